use std::path::Path;

use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::TtsError;

/// Initialize a CPU ONNX session for a voice model.
pub(crate) fn init_session(
    onnx_path: &Path,
    num_threads: Option<usize>,
) -> Result<Session, TtsError> {
    if !onnx_path.is_file() {
        return Err(TtsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Model file not found at {}", onnx_path.display()),
        )));
    }

    let providers = vec![CPUExecutionProvider::default().build()];
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers(providers)?;

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(onnx_path)?)
}

/// Whether the model declares an input called `name`.
pub(crate) fn has_input(session: &Session, name: &str) -> bool {
    session.inputs().into_iter().any(|input| input.name() == name)
}
