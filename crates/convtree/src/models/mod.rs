pub mod transcript;

pub use transcript::{
    AlternateBranch, Anomaly, AnomalyKind, ConversationRecord, DocumentMetadata, FailureKind,
    FailureRecord, ImageAsset, NormalizedMessage, Role, SCHEMA_VERSION, SchemaVersion, Transcript,
    json_schema,
};
