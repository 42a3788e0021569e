pub mod conversation;
pub mod domain;
pub mod photos;
pub mod ports;
pub mod report;
pub mod speech;

pub use conversation::{ConversationLoop, TurnError, TurnPhase};
pub use domain::{
    AuthSession, ChildProfile, ConversationSession, PhraseCard, PhraseCategory, Speaker, Turn,
    User, UserCredentials, WeekId, WeeklyReport,
};
pub use ports::{
    CompanionReplyService, DatabaseService, NewChild, PhotoStorageService, PortError,
    PortResult, ReportGenerationService, SpeechToTextService, TextToSpeechService,
};
pub use speech::{SpeechSession, SpeechUpdate, TranscriptEvent};
