//! Error types for `tilemx`

use std::path::PathBuf;

use thiserror::Error;

/// The error type for `tilemx` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Parser Errors ====================
    /// The document violates XML syntax.
    #[error("invalid syntax: line {line}, column {column}")]
    XmlSyntax {
        /// Line of the offending character.
        line: u32,
        /// Column of the offending character.
        column: u32,
    },

    /// A close tag does not lexically match its corresponding open tag.
    #[error("close tag does not match open tag: line {line}, column {column}")]
    TagMismatch {
        /// Line of the offending close tag.
        line: u32,
        /// Column of the offending close tag.
        column: u32,
    },

    /// The declared encoding contradicts a previously detected byte-order mark.
    #[error("character encoding contradiction: line {line}, column {column}")]
    EncodingConflict {
        /// Line of the encoding declaration.
        line: u32,
        /// Column of the encoding declaration.
        column: u32,
    },

    /// An `<?xml?>` or `<!DOCTYPE>` declaration appeared after the root element started.
    #[error("misplaced document declaration: line {line}, column {column}")]
    MisplacedDeclaration {
        /// Line of the declaration.
        line: u32,
        /// Column of the declaration.
        column: u32,
    },

    /// The parser reached a state that should be impossible (internal bug).
    #[error("internal parser invariant violated: line {line}, column {column}")]
    ParserInternal {
        /// Line being parsed when the invariant broke.
        line: u32,
        /// Column being parsed when the invariant broke.
        column: u32,
    },

    /// The input ended before the root element was closed.
    #[error("unexpected end of document")]
    UnexpectedEof,

    // ==================== Document Errors ====================
    /// The document parsed but did not contain the expected root record.
    #[error("document {path} contains no {expected}")]
    MissingRoot {
        /// What the document was expected to define (e.g. "tileset", "object").
        expected: &'static str,
        /// Path of the offending document.
        path: PathBuf,
    },

    // ==================== Tile Data Errors ====================
    /// A tile layer's Base64 payload could not be decoded.
    #[error("invalid Base64 tile data: {0}")]
    Base64(String),

    /// A compressed tile payload's container header did not indicate DEFLATE.
    #[error("{scheme} stream header does not indicate DEFLATE compression")]
    BadCompressionHeader {
        /// The compression scheme named by the document ("zlib" or "gzip").
        scheme: &'static str,
    },

    /// The tile payload names a compression scheme this loader does not support.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(String),

    /// DEFLATE decompression of a tile payload failed.
    #[error("DEFLATE decompression failed: {0}")]
    Deflate(String),
}

/// A specialized Result type for `tilemx` operations.
pub type Result<T> = std::result::Result<T, Error>;
