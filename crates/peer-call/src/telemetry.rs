pub mod logging {
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::str::FromStr;
    use std::sync::OnceLock;

    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    const LEVEL_VAR: &str = "PEER_CALL_LOG";
    const FILE_VAR: &str = "PEER_CALL_LOG_FILE";
    const FILTER_VAR: &str = "PEER_CALL_LOG_FILTER";
    const TRACE_DEPS_VAR: &str = "PEER_CALL_TRACE_DEPS";

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    impl FromStr for LogLevel {
        type Err = InitError;

        fn from_str(value: &str) -> Result<Self, Self::Err> {
            match value.trim().to_ascii_lowercase().as_str() {
                "error" => Ok(LogLevel::Error),
                "warn" | "warning" => Ok(LogLevel::Warn),
                "info" => Ok(LogLevel::Info),
                "debug" => Ok(LogLevel::Debug),
                "trace" => Ok(LogLevel::Trace),
                other => Err(InitError::Configure(format!("unknown log level {other:?}"))),
            }
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
        /// Full `EnvFilter` directives. Replaces the level defaults when set.
        pub filter: Option<String>,
        /// Keeps webrtc internals at full verbosity under `Trace`.
        pub trace_deps: bool,
    }

    impl LogConfig {
        pub fn from_env() -> Result<Self, InitError> {
            Self::from_lookup(|var| std::env::var(var).ok())
        }

        /// Reads the `PEER_CALL_LOG*` variables through `lookup`.
        pub fn from_lookup<F>(lookup: F) -> Result<Self, InitError>
        where
            F: Fn(&str) -> Option<String>,
        {
            let non_empty =
                |var: &str| lookup(var).filter(|value: &String| !value.trim().is_empty());
            let level = match non_empty(LEVEL_VAR) {
                Some(value) => value.parse()?,
                None => LogLevel::default(),
            };
            let file = non_empty(FILE_VAR).map(PathBuf::from);
            let filter = non_empty(FILTER_VAR);
            let trace_deps = non_empty(TRACE_DEPS_VAR).is_some_and(|value| value.trim() != "0");
            Ok(Self {
                level,
                file,
                filter,
                trace_deps,
            })
        }

        /// Directives the subscriber filters with, and whether webrtc
        /// internals were capped at `info`.
        pub fn filter_directives(&self) -> (String, bool) {
            match &self.filter {
                Some(filter) => (filter.clone(), false),
                None => default_filter_for(self.level.to_filter(), self.trace_deps),
            }
        }
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("logging already initialized")]
        AlreadyInitialized,
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }

        inner_init(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    fn inner_init(config: &LogConfig) -> Result<(), InitError> {
        let (directives, throttled_deps) = config.filter_directives();
        let env_filter = EnvFilter::try_new(&directives)
            .map_err(|err| InitError::Configure(format!("invalid filter {directives:?}: {err}")))?;

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_ids(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if err.to_string().contains("already") {
                InitError::AlreadyInitialized
            } else {
                InitError::Configure(err.to_string())
            }
        })?;

        let _ = GUARD.set(guard);
        if throttled_deps {
            tracing::debug!(
                override_with = FILTER_VAR,
                enable_with = TRACE_DEPS_VAR,
                "suppressing webrtc dependency trace noise"
            );
        }
        Ok(())
    }

    const TRACE_DEP_TARGETS: &[&str] = &[
        "webrtc",
        "webrtc_ice",
        "webrtc_dtls",
        "webrtc_sctp",
        "webrtc_srtp",
        "webrtc_mdns",
        "tokio_tungstenite",
        "tungstenite",
    ];

    fn default_filter_for(level: LevelFilter, allow_deps: bool) -> (String, bool) {
        let base = match level {
            LevelFilter::TRACE => "info,peer_call=trace",
            LevelFilter::DEBUG => "info,peer_call=debug",
            LevelFilter::INFO => "info",
            LevelFilter::WARN => "warn",
            LevelFilter::ERROR => "error",
            LevelFilter::OFF => "off",
        };
        if level == LevelFilter::TRACE && !allow_deps {
            (throttle_dependency_traces(base), true)
        } else {
            (base.to_owned(), false)
        }
    }

    fn throttle_dependency_traces(base: &str) -> String {
        let mut filter = base.to_owned();
        for target in TRACE_DEP_TARGETS {
            filter.push(',');
            filter.push_str(target);
            filter.push_str("=info");
        }
        filter
    }

}
