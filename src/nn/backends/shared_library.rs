#![cfg(target_os = "linux")]

//! Backend for networks compiled into a native shared library.
//!
//! The library exports the C ABI produced by the Blueoil converter:
//!
//! ```c
//! void* network_create(void);
//! bool  network_init(void* nn);
//! void  network_delete(void* nn);
//! int   network_get_input_rank(void* nn);
//! int   network_get_output_rank(void* nn);
//! void  network_get_input_shape(void* nn, int32_t* shape);
//! void  network_get_output_shape(void* nn, int32_t* shape);
//! void  network_run(void* nn, const float* input, float* output);
//! ```

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::nn::backend::InferenceBackend;
use crate::nn::tensor::{element_count, Tensor};

type NetworkCreate = unsafe extern "C" fn() -> *mut c_void;
type NetworkInit = unsafe extern "C" fn(*mut c_void) -> bool;
type NetworkDelete = unsafe extern "C" fn(*mut c_void);
type NetworkRank = unsafe extern "C" fn(*mut c_void) -> c_int;
type NetworkShape = unsafe extern "C" fn(*mut c_void, *mut i32);
type NetworkRun = unsafe extern "C" fn(*mut c_void, *const f32, *mut f32);

struct Symbols {
    init: NetworkInit,
    delete: NetworkDelete,
    input_rank: NetworkRank,
    output_rank: NetworkRank,
    input_shape: NetworkShape,
    output_shape: NetworkShape,
    run: NetworkRun,
}

/// Network loaded from a `.so` file with `dlopen`.
pub struct SharedLibraryBackend {
    handle: *mut c_void,
    network: *mut c_void,
    symbols: Symbols,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

// The library handle and network pointer are only touched through `&mut self`.
unsafe impl Send for SharedLibraryBackend {}

impl SharedLibraryBackend {
    /// Load the library and create (but not initialise) the network.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let c_path = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("model path {} contains a NUL byte", path.display()))?;

        // SAFETY: `c_path` is a valid NUL-terminated string for the call duration.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(anyhow!(
                "failed to load shared library {}: {}",
                path.display(),
                last_dl_error()
            ));
        }

        let loaded = (|| -> Result<(Symbols, NetworkCreate)> {
            // SAFETY: each symbol is resolved from the converter ABI above and
            // transmuted to its matching function pointer type.
            unsafe {
                let create: NetworkCreate = std::mem::transmute(symbol(handle, "network_create")?);
                let symbols = Symbols {
                    init: std::mem::transmute(symbol(handle, "network_init")?),
                    delete: std::mem::transmute(symbol(handle, "network_delete")?),
                    input_rank: std::mem::transmute(symbol(handle, "network_get_input_rank")?),
                    output_rank: std::mem::transmute(symbol(handle, "network_get_output_rank")?),
                    input_shape: std::mem::transmute(symbol(handle, "network_get_input_shape")?),
                    output_shape: std::mem::transmute(symbol(handle, "network_get_output_shape")?),
                    run: std::mem::transmute(symbol(handle, "network_run")?),
                };
                Ok((symbols, create))
            }
        })();

        let (symbols, create) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                // SAFETY: handle came from a successful dlopen.
                unsafe { libc::dlclose(handle) };
                return Err(err.context(format!("invalid network library {}", path.display())));
            }
        };

        // SAFETY: network_create takes no arguments and returns an owned network.
        let network = unsafe { create() };
        if network.is_null() {
            // SAFETY: handle came from a successful dlopen.
            unsafe { libc::dlclose(handle) };
            return Err(anyhow!("network_create returned null for {}", path.display()));
        }

        Ok(Self {
            handle,
            network,
            symbols,
            input_shape: Vec::new(),
            output_shape: Vec::new(),
        })
    }

    fn query_shape(&self, rank: NetworkRank, shape: NetworkShape) -> Result<Vec<usize>> {
        // SAFETY: the network pointer is live until drop.
        let rank = unsafe { rank(self.network) };
        if rank <= 0 {
            return Err(anyhow!("network reported rank {}", rank));
        }
        let mut dims = vec![0i32; rank as usize];
        // SAFETY: `dims` holds exactly `rank` slots as required by the ABI.
        unsafe { shape(self.network, dims.as_mut_ptr()) };
        dims.into_iter()
            .map(|d| usize::try_from(d).map_err(|_| anyhow!("network reported dimension {}", d)))
            .collect()
    }
}

impl InferenceBackend for SharedLibraryBackend {
    fn name(&self) -> &'static str {
        "shared-library"
    }

    fn init(&mut self) -> Result<()> {
        // SAFETY: the network pointer is live until drop.
        if !unsafe { (self.symbols.init)(self.network) } {
            return Err(anyhow!("network_init failed"));
        }
        self.input_shape = self.query_shape(self.symbols.input_rank, self.symbols.input_shape)?;
        self.output_shape =
            self.query_shape(self.symbols.output_rank, self.symbols.output_shape)?;
        log::info!(
            "network initialised: input {:?}, output {:?}",
            self.input_shape,
            self.output_shape
        );
        Ok(())
    }

    fn run(&mut self, input: &Tensor) -> Result<Tensor> {
        if self.input_shape.is_empty() {
            return Err(anyhow!("network used before init"));
        }
        let expected = element_count(&self.input_shape)?;
        if input.data().len() != expected {
            return Err(anyhow!(
                "input {:?} does not match network input {:?}",
                input.shape(),
                self.input_shape
            ));
        }
        let mut output = Tensor::zeros(self.output_shape.clone())?.into_data();
        // SAFETY: input and output buffers are sized to the shapes the network reported.
        unsafe {
            (self.symbols.run)(self.network, input.data().as_ptr(), output.as_mut_ptr());
        }
        Tensor::new(self.output_shape.clone(), output)
    }
}

impl Drop for SharedLibraryBackend {
    fn drop(&mut self) {
        // SAFETY: network and handle were created in `load` and are released once.
        unsafe {
            (self.symbols.delete)(self.network);
            libc::dlclose(self.handle);
        }
    }
}

unsafe fn symbol(handle: *mut c_void, name: &str) -> Result<*mut c_void> {
    let c_name = CString::new(name)?;
    let ptr = libc::dlsym(handle, c_name.as_ptr());
    if ptr.is_null() {
        return Err(anyhow!("missing symbol {}: {}", name, last_dl_error()));
    }
    Ok(ptr)
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns either null or a thread-local C string.
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown error".to_string()
    } else {
        // SAFETY: non-null dlerror results are NUL-terminated.
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_reports_path() {
        let err = SharedLibraryBackend::load("/nonexistent/libdlk_fpga.so")
            .err()
            .expect("load must fail");
        assert!(err.to_string().contains("libdlk_fpga.so"));
    }
}
