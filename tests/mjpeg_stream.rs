use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::time::Duration;

use blueoil_deploy::ingest::{CameraConfig, CaptureWorker};
use blueoil_deploy::nn::backends::StubBackend;
use blueoil_deploy::nn::Tensor;
use blueoil_deploy::publish::{
    AlertPublisher, LogSink, DEFAULT_FIREHOSE_TOPIC, DEFAULT_RESULT_TOPIC,
};
use blueoil_deploy::{MjpegServer, ModelMeta, ServerHandle, StreamContext};

fn start_server() -> ServerHandle {
    start_server_with_frames(64, 48)
}

fn start_server_with_frames(width: u32, height: u32) -> ServerHandle {
    let camera = CaptureWorker::spawn(CameraConfig {
        device: "stub://mjpeg".to_string(),
        width,
        height,
        fps: 30,
    })
    .expect("camera");
    let mut scores = vec![0.01; 10];
    scores[3] = 0.91;
    let backend = StubBackend::new(Tensor::new(vec![1, 10], scores).expect("tensor"));
    let publisher = AlertPublisher::spawn(
        Box::new(LogSink),
        DEFAULT_FIREHOSE_TOPIC.to_string(),
        DEFAULT_RESULT_TOPIC.to_string(),
    )
    .expect("publisher");
    let ctx = StreamContext::new(ModelMeta::cifar10(), Box::new(backend), camera, publisher)
        .expect("context");
    MjpegServer::new("127.0.0.1:0", ctx).spawn().expect("spawn server")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn open_stream(handle: &ServerHandle) -> TcpStream {
    let mut stream = TcpStream::connect(handle.addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("send request");
    stream
}

/// Read until the first complete JPEG part; returns everything read and the
/// part's byte range.
fn read_first_part(stream: &mut TcpStream) -> (Vec<u8>, std::ops::Range<usize>) {
    let part_header = b"Content-type: image/jpeg\r\n\r\n";
    let separator = b"\r\n--jpgboundary\r\n";
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).expect("read stream");
        assert!(n > 0, "server closed the stream early");
        received.extend_from_slice(&buf[..n]);
        if let Some(start) = find(&received, part_header) {
            let body = start + part_header.len();
            if let Some(end) = find(&received[body..], separator) {
                return (received, body..body + end);
            }
        }
    }
}

#[test]
fn get_streams_multipart_jpeg_frames() {
    let handle = start_server();

    let mut stream = open_stream(&handle);
    let (received, part) = read_first_part(&mut stream);
    drop(stream);

    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(text.contains("Content-type: multipart/x-mixed-replace; boundary=jpgboundary\r\n\r\n"));

    let jpeg = &received[part];
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let frame = image::load_from_memory(jpeg).expect("decode frame");
    assert_eq!((frame.width(), frame.height()), (64, 48));

    handle.stop().expect("stop server");
}

#[test]
fn dropped_client_does_not_stop_the_server() {
    let handle = start_server();

    let mut first = open_stream(&handle);
    read_first_part(&mut first);
    drop(first);

    let mut second = open_stream(&handle);
    let (received, part) = read_first_part(&mut second);
    let frame = image::load_from_memory(&received[part]).expect("decode frame");
    assert_eq!((frame.width(), frame.height()), (64, 48));
    drop(second);

    handle.stop().expect("stop server");
}

#[test]
fn stop_returns_while_a_client_has_stopped_reading() {
    let handle = start_server_with_frames(320, 240);

    // Never read, so the server's socket buffer fills and writes block.
    let stalled = TcpStream::connect(handle.addr).expect("connect");
    (&stalled)
        .write_all(b"GET / HTTP/1.0\r\n\r\n")
        .expect("send request");
    std::thread::sleep(Duration::from_secs(3));

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(handle.stop());
    });
    let stopped = rx
        .recv_timeout(Duration::from_secs(15))
        .expect("stop() blocked on a stalled client");
    stopped.expect("stop server");
    drop(stalled);
}

#[test]
fn other_methods_are_not_implemented() {
    let handle = start_server();

    let mut stream = TcpStream::connect(handle.addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
        .expect("send request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    assert!(response.starts_with("HTTP/1.0 501 Not Implemented\r\n"));

    handle.stop().expect("stop server");
}
