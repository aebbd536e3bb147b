//! Loading compiled artifacts across the C ABI
//!
//! A `NativeArtifact` owns the dynamic library handle. The handle is acquired
//! in `load`, used for any number of calls and released exactly once, either
//! by `close` or by dropping the value, whichever happens first, on every
//! exit path. The value is `Send` but not `Sync`: generated code is not
//! assumed reentrant, so one artifact serves one verification run.

use crate::errors::{ForestError, Result};
use crate::predictor::Predictor;
use libloading::{Library, Symbol};
use std::cell::Cell;
use std::ffi::CString;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Signature of the generated entry point
pub type PredictFn = unsafe extern "C" fn(*const f64) -> f64;

/// Signature of the optional batch entry point
pub type PredictBatchFn = unsafe extern "C" fn(*const f64, usize, *mut f64);

/// What the loader expects to find in the artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Exported entry point name
    pub entry_symbol: String,
    /// Number of doubles the entry point reads per call
    pub num_features: usize,
}

impl LoadOptions {
    pub fn new(entry_symbol: impl Into<String>, num_features: usize) -> Self {
        Self {
            entry_symbol: entry_symbol.into(),
            num_features,
        }
    }
}

/// Platform file name for a shared library called `stem`
pub fn shared_library_name(stem: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{stem}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{stem}.dylib")
    } else {
        format!("lib{stem}.so")
    }
}

/// A loaded inference artifact
pub struct NativeArtifact {
    entry_fn: PredictFn,
    batch_fn: Option<PredictBatchFn>,
    // Declared after the function pointers: they are only valid while the
    // library stays mapped.
    library: Library,
    path: PathBuf,
    symbol: String,
    num_features: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl std::fmt::Debug for NativeArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeArtifact")
            .field("path", &self.path)
            .field("symbol", &self.symbol)
            .field("num_features", &self.num_features)
            .field("batch", &self.batch_fn.is_some())
            .finish()
    }
}

impl NativeArtifact {
    /// Open `path` and resolve the entry point by exact name.
    ///
    /// The calling convention is not checked here: it is fixed by the code
    /// generator, and a mismatch shows up as a failed call or a non-finite
    /// result.
    pub fn load<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |reason: String| ForestError::NativeLoad {
            path: path.to_path_buf(),
            symbol: options.entry_symbol.clone(),
            reason,
        };

        if !path.is_file() {
            return Err(load_error("artifact not found".to_string()));
        }

        let entry = CString::new(options.entry_symbol.as_str())
            .map_err(|_| load_error("symbol name contains a NUL byte".to_string()))?;
        let batch = CString::new(format!("{}_batch", options.entry_symbol))
            .map_err(|_| load_error("symbol name contains a NUL byte".to_string()))?;

        // SAFETY: loading runs the library's initializers; artifacts are
        // produced by our own code generator and contain none.
        let library = unsafe { Library::new(path) }
            .map_err(|e| load_error(format!("failed to open library: {e}")))?;

        // SAFETY: the symbol type matches the generated prototype
        // `double <entry>(const double*)`.
        let entry_fn: PredictFn = unsafe {
            let symbol: Symbol<PredictFn> = library
                .get(entry.as_bytes_with_nul())
                .map_err(|e| load_error(format!("symbol not found: {e}")))?;
            *symbol
        };

        // SAFETY: as above, for `void <entry>_batch(const double*, size_t, double*)`.
        let batch_fn: Option<PredictBatchFn> = unsafe {
            library
                .get::<PredictBatchFn>(batch.as_bytes_with_nul())
                .ok()
                .map(|symbol| *symbol)
        };

        debug!(
            "Loaded {} (entry `{}`, batch: {})",
            path.display(),
            options.entry_symbol,
            batch_fn.is_some()
        );

        Ok(Self {
            entry_fn,
            batch_fn,
            library,
            path: path.to_path_buf(),
            symbol: options.entry_symbol.clone(),
            num_features: options.num_features,
            _not_sync: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn has_batch(&self) -> bool {
        self.batch_fn.is_some()
    }

    fn call_error(&self, reason: String) -> ForestError {
        ForestError::NativeCall {
            symbol: self.symbol.clone(),
            reason,
        }
    }

    /// Invoke the entry point on one feature vector
    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.num_features {
            return Err(self.call_error(format!(
                "buffer holds {} values, entry point reads {}",
                features.len(),
                self.num_features
            )));
        }

        // SAFETY: `features` is a live buffer of exactly `num_features`
        // doubles and the function pointer is valid while `self.library` is
        // loaded, which `&self` guarantees.
        let value = unsafe { (self.entry_fn)(features.as_ptr()) };

        if !value.is_finite() {
            return Err(self.call_error(format!("non-finite result {value}")));
        }
        Ok(value)
    }

    /// Invoke the batch entry point on row-major `rows`
    pub fn predict_batch(&self, rows: &[f64]) -> Result<Vec<f64>> {
        let batch = self
            .batch_fn
            .ok_or_else(|| self.call_error("artifact exports no batch entry point".to_string()))?;

        if self.num_features == 0 || rows.len() % self.num_features != 0 {
            return Err(self.call_error(format!(
                "batch buffer of {} values is not a whole number of {}-feature rows",
                rows.len(),
                self.num_features
            )));
        }

        let num_rows = rows.len() / self.num_features;
        let mut out = vec![0.0; num_rows];
        // SAFETY: input holds `num_rows * num_features` doubles and `out`
        // holds `num_rows`, matching the generated loop bounds.
        unsafe { batch(rows.as_ptr(), num_rows, out.as_mut_ptr()) };

        if let Some(bad) = out.iter().find(|v| !v.is_finite()) {
            return Err(self.call_error(format!("non-finite result {bad}")));
        }
        Ok(out)
    }

    /// Unload the library, surfacing any error from the platform loader
    pub fn close(self) -> Result<()> {
        let Self {
            library,
            path,
            symbol,
            ..
        } = self;
        debug!("Unloading {}", path.display());
        library.close().map_err(|e| ForestError::NativeLoad {
            path,
            symbol,
            reason: format!("failed to unload library: {e}"),
        })
    }
}

impl Predictor for NativeArtifact {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        NativeArtifact::predict(self, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(shared_library_name("absent"));
        match NativeArtifact::load(&path, &LoadOptions::new("predict", 1)) {
            Err(ForestError::NativeLoad { symbol, reason, .. }) => {
                assert_eq!(symbol, "predict");
                assert!(reason.contains("not found"));
            }
            other => panic!("expected NativeLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_not_a_library() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not an object file").unwrap();
        assert!(matches!(
            NativeArtifact::load(file.path(), &LoadOptions::new("predict", 1)),
            Err(ForestError::NativeLoad { .. })
        ));
    }

    #[test]
    fn test_library_name() {
        let name = shared_library_name("forest");
        assert!(name.contains("forest"));
        if cfg!(target_os = "linux") {
            assert_eq!(name, "libforest.so");
        }
    }
}
