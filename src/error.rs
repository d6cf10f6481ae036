/*
 * This file is part of lsstor.
 *
 * Copyright (C) 2025 lsstor contributors
 *
 * lsstor is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lsstor is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lsstor. If not, see <https://www.gnu.org/licenses/>.
 */

//! Error types shared by the library.
//!
//! Most of the engine never fails outright: missing sysfs attributes are
//! substituted and missing subsystems yield empty lists. The types here cover
//! the few places where a caller has to see a failure.

use std::io;
use std::path::PathBuf;

/// Result type alias using LsstorError
pub type Result<T> = std::result::Result<T, LsstorError>;

/// Failure to decode an address tuple or filter argument.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed address '{0}'")]
    Malformed(String),

    #[error("unable to decode '{component}' as an integer in '{input}'")]
    NotAnInteger { input: String, component: String },

    #[error("expect three colons at most in '{0}'")]
    TooManyComponents(String),

    #[error("too many filter arguments ({0}), at most 4 allowed")]
    TooManyArguments(usize),
}

/// Failure to accept a Device Identification VPD page.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VpdError {
    #[error("VPD page too short: {0} bytes")]
    TooShort(usize),

    #[error("unexpected VPD page code 0x{0:02x}, expected 0x83")]
    WrongPage(u8),

    #[error("VPD page length field says {declared} bytes but {actual} were read")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Unified error type for lsstor operations
#[derive(thiserror::Error, Debug)]
pub enum LsstorError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Decoding Errors
    // ============================================================================
    #[error("Address error: {0}")]
    Parse(#[from] ParseError),

    #[error("VPD error: {0}")]
    Vpd(#[from] VpdError),

    // ============================================================================
    // Configuration and Usage Errors
    // ============================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Usage error: {0}")]
    Usage(String),
}
