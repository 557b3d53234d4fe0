// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{DateTime, Utc};

/// One extracted log line together with its routing metadata.
///
/// Built by a tailer per complete line and consumed exactly once by the
/// forwarder; the field-name strings name the keys under which body, path,
/// and host are emitted on the wire.
#[derive(Debug, Clone)]
pub struct Record {
    pub tag: String,
    pub timestamp: DateTime<Utc>,
    pub message: Vec<u8>,
    pub path: String,
    pub host: String,
    pub field_name: String,
    pub path_field_name: String,
    pub host_field_name: String,
}
