//! End-to-end export and verification
//!
//! `workdir` layout: generated sources under `src/`, objects and the linked
//! library under `build/`.

use crate::codegen::{self, GeneratedSources};
use crate::config::ForestConfig;
use crate::errors::Result;
use crate::fixture::ReferenceFixture;
use crate::ir::TreeEnsembleIR;
use crate::native::{LoadOptions, NativeArtifact};
use crate::toolchain;
use crate::verify::VerificationReport;
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths produced by an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub sources: GeneratedSources,
    pub library: PathBuf,
}

impl ExportedArtifact {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::new(
            self.sources.entry_symbol.clone(),
            self.sources.num_features,
        )
    }
}

/// Generate sources for `ir` and build them into a shared library
pub fn export<P: AsRef<Path>>(
    ir: &TreeEnsembleIR,
    workdir: P,
    config: &ForestConfig,
) -> Result<ExportedArtifact> {
    let workdir = workdir.as_ref();
    config.validate()?;

    let sources = codegen::generate(ir, workdir.join("src"), &config.codegen)?;
    let library =
        toolchain::build_shared_library(&sources, workdir.join("build"), &config.toolchain)?;

    info!("Exported model {} to {}", sources.fingerprint, library.display());
    Ok(ExportedArtifact { sources, library })
}

/// Export `ir`, load the artifact and verify it against `fixture`.
///
/// The fixture width is checked against the IR before anything is generated.
/// The loaded library is released before returning, whatever the outcome.
pub fn verify_ensemble<P: AsRef<Path>>(
    ir: &TreeEnsembleIR,
    fixture: &ReferenceFixture,
    workdir: P,
    config: &ForestConfig,
) -> Result<VerificationReport> {
    let harness = config.harness()?;
    harness.check_fixture(fixture, ir.num_features as usize)?;

    let exported = export(ir, workdir, config)?;
    let artifact = NativeArtifact::load(&exported.library, &exported.load_options())?;
    let report = harness.run(fixture, &artifact);
    drop(artifact);
    report
}
