// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod buffer_pool;
pub mod code_render;
pub mod diagnostics;
pub mod frame_buffer;
pub mod frame_source;
pub mod image_source;
pub mod scan_config;
pub mod scan_engine;
pub mod scan_error;
pub mod scan_session;
pub mod select_source;
pub mod session_state;
pub mod shared_state;
pub mod worker;
