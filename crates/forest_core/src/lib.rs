//! Tree-ensemble export to native code
//!
//! Takes a regression forest trained elsewhere, describes it as a portable
//! IR, emits C sources that evaluate it, builds them into a shared library
//! and proves the library reproduces the trained model's predictions.
//!
//! Modules:
//! - `ir`: Tree-ensemble IR and the reference evaluator
//! - `serializer`: IR document schema, validation, canonical form and fingerprint
//! - `import`: Importers from third-party dumps (treelite JSON)
//! - `codegen`: C code generation with deterministic unit partitioning
//! - `toolchain`: C compiler driver producing the shared library
//! - `native`: Loading compiled artifacts and calling their entry point
//! - `fixture`: Reference fixtures of inputs and expected outputs
//! - `verify`: Tolerance checks of a predictor against a fixture
//! - `pipeline`: Generate, build, load and verify in one call
//! - `config`: TOML configuration

pub mod codegen;
pub mod config;
pub mod errors;
pub mod fixture;
pub mod import;
pub mod ir;
pub mod native;
pub mod pipeline;
pub mod predictor;
pub mod serializer;
pub mod toolchain;
pub mod verify;

pub use codegen::{generate, render, CodegenOptions, GeneratedSources, PartitionStrategy};
pub use config::ForestConfig;
pub use errors::{ForestError, Result};
pub use fixture::ReferenceFixture;
pub use ir::{Aggregation, ComparisonOp, FeatureType, Node, Predicate, Tree, TreeEnsembleIR};
pub use native::{LoadOptions, NativeArtifact};
pub use predictor::Predictor;
pub use serializer::{deserialize, serialize, IrDocument};
pub use verify::{Tolerance, VerificationHarness, VerificationReport};

/// Crate version string, stamped into CLI output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
