//! Record generation: themes, batch prompts, response parsing and the
//! `RecordGenerator` seam used by the pipeline.

mod generator;
mod prompt;
mod themes;

pub use generator::{ApiGenerator, RecordGenerator};
pub use prompt::{build_batch_prompt, parse_batch_response, strip_code_fences, validate_record};
pub use themes::load_themes;
