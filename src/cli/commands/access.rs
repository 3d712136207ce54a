use clap::{Arg, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_LOGIN_PATH: &str = "login-path";
pub const ARG_LANDING_PATH: &str = "landing-path";
pub const ARG_RATE_LIMIT_WINDOW_MS: &str = "rate-limit-window-ms";
pub const ARG_RATE_LIMIT_MAX_REQUESTS: &str = "rate-limit-max-requests";
pub const ARG_RATE_LIMIT_SWEEP_SECONDS: &str = "rate-limit-sweep-seconds";
pub const ARG_CODE_TTL_SECONDS: &str = "code-ttl-seconds";
pub const ARG_DATASTORE_TIMEOUT_MS: &str = "datastore-timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_gate_args(command);
    let command = with_rate_limit_args(command);
    with_ledger_args(command)
}

fn with_gate_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the only allowed CORS origin")
                .env("TOURGATE_FRONTEND_BASE_URL")
                .default_value("https://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_LOGIN_PATH)
                .long(ARG_LOGIN_PATH)
                .help("Where the admin page gate sends callers without a session")
                .env("TOURGATE_LOGIN_PATH")
                .default_value("/login"),
        )
        .arg(
            Arg::new(ARG_LANDING_PATH)
                .long(ARG_LANDING_PATH)
                .help("Where the admin page gate sends signed-in callers without an admin role")
                .env("TOURGATE_LANDING_PATH")
                .default_value("/"),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_MS)
                .long(ARG_RATE_LIMIT_WINDOW_MS)
                .help("Fixed rate-limit window in milliseconds")
                .env("TOURGATE_RATE_LIMIT_WINDOW_MS")
                .default_value("60000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX_REQUESTS)
                .long(ARG_RATE_LIMIT_MAX_REQUESTS)
                .help("Requests admitted per identity per window")
                .env("TOURGATE_RATE_LIMIT_MAX_REQUESTS")
                .default_value("30")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_SWEEP_SECONDS)
                .long(ARG_RATE_LIMIT_SWEEP_SECONDS)
                .help("Interval of the sweep that drops expired rate-limit records")
                .env("TOURGATE_RATE_LIMIT_SWEEP_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_ledger_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CODE_TTL_SECONDS)
                .long(ARG_CODE_TTL_SECONDS)
                .help("Lifetime of issued email codes in seconds")
                .env("TOURGATE_CODE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_DATASTORE_TIMEOUT_MS)
                .long(ARG_DATASTORE_TIMEOUT_MS)
                .help("Upper bound for every datastore round trip in milliseconds")
                .env("TOURGATE_DATASTORE_TIMEOUT_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64)),
        )
}
