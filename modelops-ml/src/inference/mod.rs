//! Translation model wrapper and its packaging workflow.

pub mod packaging;
pub mod translator;

pub use packaging::{package_translator, translator_signature};
pub use translator::{
    HfInferencePipeline, HfPipelineFactory, PipelineFactory, PredictModel, TranslationPipeline,
    Translator,
};
