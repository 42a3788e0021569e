pub mod companion_llm;
pub mod db;
pub mod photo_store;
pub mod report_llm;
pub mod sst;
pub mod tts;

pub use companion_llm::OpenAiCompanionAdapter;
pub use db::DbAdapter;
pub use photo_store::LocalPhotoStore;
pub use report_llm::OpenAiReportAdapter;
pub use sst::OpenAiSstAdapter;
pub use tts::OpenAiTtsAdapter;
