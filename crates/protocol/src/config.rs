use serde::{Deserialize, Serialize};

fn default_discovery_timeout_ms() -> u64 {
    2000
}
fn default_discovery_listen_port() -> u16 {
    9303
}
fn default_discovery_target_port() -> u16 {
    9302
}
fn default_discovery_protocol_version() -> String {
    "00030010".to_string()
}

/// Settings for C2 (discovery): probe timeout and the fixed console ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_discovery_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_discovery_target_port")]
    pub target_port: u16,
    #[serde(default = "default_discovery_protocol_version")]
    pub protocol_version: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_discovery_timeout_ms(),
            listen_port: default_discovery_listen_port(),
            target_port: default_discovery_target_port(),
            protocol_version: default_discovery_protocol_version(),
        }
    }
}

fn default_wake_timeout_ms() -> u64 {
    30_000
}
fn default_wake_target_port() -> u16 {
    9302
}
fn default_wake_poll_interval_ms() -> u64 {
    1000
}

/// Settings for C3 (wake): poll-until-ready timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeConfig {
    #[serde(default = "default_wake_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_wake_target_port")]
    pub target_port: u16,
    #[serde(default = "default_wake_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_wake_timeout_ms(),
            target_port: default_wake_target_port(),
            poll_interval_ms: default_wake_poll_interval_ms(),
        }
    }
}

fn default_registration_http_timeout_ms() -> u64 {
    30_000
}
fn default_ps4_regist_port() -> u16 {
    9295
}
fn default_ps5_regist_port() -> u16 {
    9302
}
fn default_rp_version_ps4() -> String {
    "8.0".to_string()
}
fn default_rp_version_ps5() -> String {
    "10.0".to_string()
}

/// Settings for C4 (registration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_registration_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_ps4_regist_port")]
    pub ps4_port: u16,
    #[serde(default = "default_ps5_regist_port")]
    pub ps5_port: u16,
    #[serde(default = "default_rp_version_ps4")]
    pub rp_version_ps4: String,
    #[serde(default = "default_rp_version_ps5")]
    pub rp_version_ps5: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_registration_http_timeout_ms(),
            ps4_port: default_ps4_regist_port(),
            ps5_port: default_ps5_regist_port(),
            rp_version_ps4: default_rp_version_ps4(),
            rp_version_ps5: default_rp_version_ps5(),
        }
    }
}

fn default_handshake_tcp_timeout_ms() -> u64 {
    15_000
}
fn default_os_type() -> String {
    "Win10.0.0".to_string()
}
fn default_con_path() -> String {
    "1".to_string()
}

/// Settings for C5 (session handshake).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default = "default_handshake_tcp_timeout_ms")]
    pub tcp_timeout_ms: u64,
    #[serde(default = "default_os_type")]
    pub os_type: String,
    #[serde(default = "default_con_path")]
    pub con_path: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            tcp_timeout_ms: default_handshake_tcp_timeout_ms(),
            os_type: default_os_type(),
            con_path: default_con_path(),
        }
    }
}

fn default_takion_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_rto_initial_ms() -> u64 {
    300
}
fn default_rto_max_ms() -> u64 {
    2000
}
fn default_rto_max_attempts() -> u32 {
    5
}
fn default_heartbeat_interval_ms() -> u64 {
    1000
}
fn default_heartbeat_miss_deadline_ms() -> u64 {
    3000
}

/// Settings for C6 (takion transport): handshake timeout, RTO backoff schedule,
/// heartbeat cadence and the miss count that tears the session down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakionConfig {
    #[serde(default = "default_takion_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_rto_initial_ms")]
    pub rto_initial_ms: u64,
    #[serde(default = "default_rto_max_ms")]
    pub rto_max_ms: u64,
    #[serde(default = "default_rto_max_attempts")]
    pub rto_max_attempts: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_miss_deadline_ms")]
    pub heartbeat_miss_deadline_ms: u64,
}

impl Default for TakionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_takion_handshake_timeout_ms(),
            rto_initial_ms: default_rto_initial_ms(),
            rto_max_ms: default_rto_max_ms(),
            rto_max_attempts: default_rto_max_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_miss_deadline_ms: default_heartbeat_miss_deadline_ms(),
        }
    }
}

fn default_frame_deadline_ms() -> u64 {
    200
}
fn default_n_drop() -> u32 {
    4
}
fn default_n_frames_in_flight() -> usize {
    8
}
fn default_consecutive_reuse_limit() -> u32 {
    30
}
fn default_audio_jitter_ms() -> u64 {
    120
}
fn default_crypto_fault_bad_packet_threshold() -> u32 {
    100
}
fn default_crypto_fault_window_ms() -> u64 {
    1000
}
fn default_av_sink_backpressure_ms() -> u64 {
    50
}

/// Settings for C7 (media pipeline): frame assembly deadlines, FEC/jitter
/// windows and the crypto-fault escalation threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_frame_deadline_ms")]
    pub frame_deadline_ms: u64,
    #[serde(default = "default_n_drop")]
    pub n_drop: u32,
    #[serde(default = "default_n_frames_in_flight")]
    pub n_frames_in_flight: usize,
    #[serde(default = "default_consecutive_reuse_limit")]
    pub consecutive_reuse_limit: u32,
    #[serde(default = "default_audio_jitter_ms")]
    pub audio_jitter_ms: u64,
    #[serde(default = "default_crypto_fault_bad_packet_threshold")]
    pub crypto_fault_bad_packet_threshold: u32,
    #[serde(default = "default_crypto_fault_window_ms")]
    pub crypto_fault_window_ms: u64,
    #[serde(default = "default_av_sink_backpressure_ms")]
    pub av_sink_backpressure_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            frame_deadline_ms: default_frame_deadline_ms(),
            n_drop: default_n_drop(),
            n_frames_in_flight: default_n_frames_in_flight(),
            consecutive_reuse_limit: default_consecutive_reuse_limit(),
            audio_jitter_ms: default_audio_jitter_ms(),
            crypto_fault_bad_packet_threshold: default_crypto_fault_bad_packet_threshold(),
            crypto_fault_window_ms: default_crypto_fault_window_ms(),
            av_sink_backpressure_ms: default_av_sink_backpressure_ms(),
        }
    }
}

fn default_feedback_state_interval_ms() -> u64 {
    8
}
fn default_feedback_heartbeat_interval_ms() -> u64 {
    100
}
fn default_feedback_history_interval_ms() -> u64 {
    200
}
fn default_feedback_history_batch_size() -> usize {
    30
}

/// Settings for C8 (feedback channel): state/heartbeat/history send cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_feedback_state_interval_ms")]
    pub state_interval_ms: u64,
    #[serde(default = "default_feedback_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_feedback_history_interval_ms")]
    pub history_interval_ms: u64,
    #[serde(default = "default_feedback_history_batch_size")]
    pub history_batch_size: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            state_interval_ms: default_feedback_state_interval_ms(),
            heartbeat_interval_ms: default_feedback_heartbeat_interval_ms(),
            history_interval_ms: default_feedback_history_interval_ms(),
            history_batch_size: default_feedback_history_batch_size(),
        }
    }
}

fn default_session_teardown_deadline_ms() -> u64 {
    500
}

/// Top-level configuration for the Remote Play bridge core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlayConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub takion: TakionConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default = "default_session_teardown_deadline_ms")]
    pub session_teardown_deadline_ms: u64,
}

impl Default for RemotePlayConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            wake: WakeConfig::default(),
            registration: RegistrationConfig::default(),
            handshake: HandshakeConfig::default(),
            takion: TakionConfig::default(),
            media: MediaConfig::default(),
            feedback: FeedbackConfig::default(),
            session_teardown_deadline_ms: default_session_teardown_deadline_ms(),
        }
    }
}

impl RemotePlayConfig {
    /// Validate cross-field and range constraints. Returns a list of issues,
    /// each prefixed `ERROR:` (fatal) or `WARNING:` (suspicious but usable).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.discovery.timeout_ms == 0 {
            issues.push("ERROR: discovery.timeout_ms must be > 0".to_string());
        }
        if self.discovery.listen_port == self.discovery.target_port {
            issues.push(
                "WARNING: discovery.listen_port equals target_port, unusual for unicast probing"
                    .to_string(),
            );
        }

        if self.wake.timeout_ms == 0 {
            issues.push("ERROR: wake.timeout_ms must be > 0".to_string());
        }
        if self.wake.poll_interval_ms == 0 || self.wake.poll_interval_ms > self.wake.timeout_ms {
            issues.push(
                "ERROR: wake.poll_interval_ms must be > 0 and <= wake.timeout_ms".to_string(),
            );
        }

        if self.registration.http_timeout_ms == 0 {
            issues.push("ERROR: registration.http_timeout_ms must be > 0".to_string());
        }
        if self.registration.ps4_port == 0 || self.registration.ps5_port == 0 {
            issues.push("ERROR: registration ports must be nonzero".to_string());
        }

        if self.handshake.tcp_timeout_ms == 0 {
            issues.push("ERROR: handshake.tcp_timeout_ms must be > 0".to_string());
        }

        if self.takion.rto_initial_ms == 0 {
            issues.push("ERROR: takion.rto_initial_ms must be > 0".to_string());
        }
        if self.takion.rto_max_ms < self.takion.rto_initial_ms {
            issues.push(
                "ERROR: takion.rto_max_ms must be >= takion.rto_initial_ms".to_string(),
            );
        }
        if self.takion.rto_max_attempts == 0 {
            issues.push("ERROR: takion.rto_max_attempts must be > 0".to_string());
        }
        if self.takion.heartbeat_miss_deadline_ms < self.takion.heartbeat_interval_ms {
            issues.push(
                "WARNING: takion.heartbeat_miss_deadline_ms is shorter than heartbeat_interval_ms, session will stall after a single miss"
                    .to_string(),
            );
        }

        if self.media.frame_deadline_ms == 0 {
            issues.push("ERROR: media.frame_deadline_ms must be > 0".to_string());
        }
        if self.media.n_frames_in_flight == 0 {
            issues.push("ERROR: media.n_frames_in_flight must be > 0".to_string());
        }
        if self.media.n_drop == 0 {
            issues.push(
                "WARNING: media.n_drop is 0, frames will only time out by wall clock, never by frame-count"
                    .to_string(),
            );
        }
        if self.media.consecutive_reuse_limit == 0 {
            issues.push(
                "WARNING: media.consecutive_reuse_limit is 0, every lost non-key frame forces an IDR request"
                    .to_string(),
            );
        }

        if self.feedback.state_interval_ms == 0 {
            issues.push("ERROR: feedback.state_interval_ms must be > 0".to_string());
        }
        if self.feedback.heartbeat_interval_ms < self.feedback.state_interval_ms {
            issues.push(
                "ERROR: feedback.heartbeat_interval_ms must be >= feedback.state_interval_ms"
                    .to_string(),
            );
        }
        if self.feedback.history_batch_size == 0 {
            issues.push("WARNING: feedback.history_batch_size is 0, history packets carry no diffs".to_string());
        }

        if self.session_teardown_deadline_ms == 0 {
            issues.push("ERROR: session_teardown_deadline_ms must be > 0".to_string());
        }

        if issues.iter().any(|i| i.starts_with("ERROR:")) {
            Err(issues)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let config: RemotePlayConfig = toml::from_str("").unwrap();
        assert_eq!(config, RemotePlayConfig::default());
    }

    #[test]
    fn defaults_match_spec_constants() {
        let config = RemotePlayConfig::default();
        assert_eq!(config.discovery.timeout_ms, 2000);
        assert_eq!(config.wake.timeout_ms, 30_000);
        assert_eq!(config.registration.ps4_port, 9295);
        assert_eq!(config.registration.ps5_port, 9302);
        assert_eq!(config.handshake.tcp_timeout_ms, 15_000);
        assert_eq!(config.takion.rto_initial_ms, 300);
        assert_eq!(config.takion.rto_max_ms, 2000);
        assert_eq!(config.takion.rto_max_attempts, 5);
        assert_eq!(config.takion.heartbeat_interval_ms, 1000);
        assert_eq!(config.takion.heartbeat_miss_deadline_ms, 3000);
        assert_eq!(config.media.frame_deadline_ms, 200);
        assert_eq!(config.media.n_drop, 4);
        assert_eq!(config.media.n_frames_in_flight, 8);
        assert_eq!(config.media.consecutive_reuse_limit, 30);
        assert_eq!(config.media.audio_jitter_ms, 120);
        assert_eq!(config.feedback.state_interval_ms, 8);
        assert_eq!(config.feedback.heartbeat_interval_ms, 100);
        assert_eq!(config.feedback.history_interval_ms, 200);
        assert_eq!(config.feedback.history_batch_size, 30);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let toml_str = r#"
            [takion]
            rto_initial_ms = 500
        "#;
        let config: RemotePlayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.takion.rto_initial_ms, 500);
        assert_eq!(config.takion.rto_max_ms, 2000);
        assert_eq!(config.discovery.timeout_ms, 2000);
    }

    #[test]
    fn default_config_validates_clean() {
        assert!(RemotePlayConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_discovery_timeout_is_error() {
        let mut config = RemotePlayConfig::default();
        config.discovery.timeout_ms = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("discovery.timeout_ms")));
    }

    #[test]
    fn rto_max_below_initial_is_error() {
        let mut config = RemotePlayConfig::default();
        config.takion.rto_initial_ms = 1000;
        config.takion.rto_max_ms = 500;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("rto_max_ms")));
    }

    #[test]
    fn heartbeat_deadline_shorter_than_interval_is_warning_not_error() {
        let mut config = RemotePlayConfig::default();
        config.takion.heartbeat_miss_deadline_ms = 500;
        config.takion.heartbeat_interval_ms = 1000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_frames_in_flight_is_error() {
        let mut config = RemotePlayConfig::default();
        config.media.n_frames_in_flight = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("n_frames_in_flight")));
    }

    #[test]
    fn feedback_heartbeat_faster_than_state_interval_is_error() {
        let mut config = RemotePlayConfig::default();
        config.feedback.state_interval_ms = 100;
        config.feedback.heartbeat_interval_ms = 50;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("heartbeat_interval_ms")));
    }

    #[test]
    fn zero_teardown_deadline_is_error() {
        let mut config = RemotePlayConfig::default();
        config.session_teardown_deadline_ms = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("session_teardown_deadline_ms")));
    }
}
