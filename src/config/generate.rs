pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SMSBATCH CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/smsbatch/config.yml
#   3. /etc/smsbatch/config.yml
#
# Values of the form $env{NAME} are read from the environment at startup.
# Durations accept suffixes such as 500ms, 10s, 15m, 1h.

# =============================================================================
# SERVER
# =============================================================================
server:
  listen: "0.0.0.0:5000"

# =============================================================================
# CARRIER
# =============================================================================
# 'simulated' accepts messages locally and rejects a random share of them.
# Switch to the twilio block below to send real messages.
carrier:
  type: simulated
  failure_rate: 0.1
  latency: 200ms

# carrier:
#   type: twilio
#   account_sid: $env{TWILIO_ACCOUNT_SID}
#   auth_token: $env{TWILIO_AUTH_TOKEN}
#   from_number: $env{TWILIO_PHONE_NUMBER}
#   timeout: 10s

# =============================================================================
# STORAGE
# =============================================================================
# Every send attempt is appended here. Recording is best-effort; an
# unavailable store never stops a batch.
storage:
  path: ~/.local/share/smsbatch/messages.duckdb

# =============================================================================
# DISPATCH
# =============================================================================
dispatch:
  # Attempts included in each progress update
  recent_messages: 10
  # Finished batches kept in memory for GET /api/batches/:id
  retain_finished: 256
  # Updates queued per progress observer before new ones are dropped
  observer_buffer: 64

# =============================================================================
# RATE LIMITING (per client IP)
# =============================================================================
rate_limit:
  api:
    window: 15m
    max_requests: 100
  sms:
    window: 1h
    max_requests: 15
"#
    .to_string()
}
