use thiserror::Error;

/// All errors produced by aria-core.
#[derive(Debug, Error)]
pub enum AriaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("input device cannot capture at {requested} Hz")]
    UnsupportedSampleRate { requested: u32 },

    #[error("no supported audio clip codec in the preference list")]
    NoSupportedCodec,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("event store error: {0}")]
    Store(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AriaError>;
