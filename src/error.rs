//! # Error Types Module
//!
//! Questo modulo definisce i tipi di errore custom dell'applicazione.
//!
//! ## Categorie di errori:
//! - `Io`: Errori di I/O (file non trovati, permessi, etc.)
//! - `Image`: Errori di decodifica/codifica immagini
//! - `Encoder`: Errori dell'encoder video esterno (ffmpeg)
//! - `Probe`: Errori di analisi media con ffprobe
//! - `UnsupportedFormat`: Formato file non supportato
//! - `MissingDependency`: Tool esterno mancante (ffmpeg, ffprobe)
//! - `Validation`: Errori di validazione della configurazione
//!
//! Gli esiti "soft" (file saltati, abort per proiezione sfavorevole) non
//! sono errori: vengono modellati come `scheduler::TaskOutcome`.

/// Custom error types for media compression
#[derive(thiserror::Error, Debug)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Media probe error: {0}")]
    Probe(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
