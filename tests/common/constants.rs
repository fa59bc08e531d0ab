//! Shared constants for end-to-end tests
//!
//! When test data changes (user handles, script outputs, etc.),
//! update only this file.

// ============================================================================
// Test Users
// ============================================================================

/// Regular test user handle
pub const TEST_USER: &str = "testuser";

/// Second user, for checking that libraries stay separate
pub const OTHER_USER: &str = "otheruser";

// ============================================================================
// Test Audio
// ============================================================================

/// Content type of the uploaded test audio
pub const TEST_AUDIO_MIME: &str = "audio/mpeg";

/// Bytes standing in for an audio file; nothing decodes them in tests
pub const TEST_AUDIO_BYTES: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00fake-mp3-frames";

// ============================================================================
// Scripted AI Outputs
// ============================================================================

/// Training script output for a successful run
pub const TRAINING_SUCCESS_STDOUT: &str =
    r#"{"success":true,"accuracy":0.82,"tracks_trained":5,"unique_tags":3}"#;

/// Training script output for a model that trained but is not good enough to use
pub const TRAINING_LOW_ACCURACY_STDOUT: &str =
    r#"{"success":true,"accuracy":0.25,"tracks_trained":5,"unique_tags":3}"#;

/// Inference script output with three predictions
pub const INFERENCE_SUCCESS_STDOUT: &str = r#"{"success":true,"predictions":[{"tag":"Jazz","confidence":0.91},{"tag":"chill","confidence":0.64},{"tag":"piano","confidence":0.32}]}"#;

/// Number of tracks with custom tags needed before training is allowed
pub const REQUIRED_TRAINING_TRACKS: usize = 5;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Upload limit configured on test servers (bytes)
pub const TEST_MAX_UPLOAD_BYTES: usize = 64 * 1024;
