//! Initialises the tracing subscribers of a release pipeline binary: console
//! output, rolling JSON file output and OTLP trace export.
//!
//! To get started, see [`Tracing`].

use std::path::PathBuf;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{ExporterBuildError, SpanExporter};
use opentelemetry_sdk::{Resource, propagation::TraceContextPropagator, trace::SdkTracerProvider};
use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt as _};

use crate::tracing::settings::*;

pub mod settings;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to install opentelemetry trace exporter"))]
    InstallOtelTraceExporter { source: ExporterBuildError },

    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// A set of pre-configured tracing subscribers.
///
/// The subscribers stay active as long as the value returned by
/// [`Tracing::init`] is alive. Dropping it flushes and shuts down the OTLP
/// exporter, so hold onto it until the binary exits:
///
/// ```no_run
/// # use release_telemetry::tracing::{Tracing, TelemetryOptions, Error};
/// # fn main() -> Result<(), Error> {
/// let _tracing_guard = Tracing::pre_configured("release-manifest", TelemetryOptions::default()).init()?;
///
/// tracing::info!("log a message");
/// # Ok(())
/// # }
/// ```
///
/// # Environment variables
///
/// The pre-configured instance reads the level of each subscriber from
/// [`Tracing::CONSOLE_LOG_LEVEL`], [`Tracing::FILE_LOG_LEVEL`] and
/// [`Tracing::OTEL_TRACE_EXPORTER_LEVEL`], each defaulting to `INFO`. The
/// OTLP exporter is configured through the standard `OTEL_EXPORTER_OTLP_*`
/// variables.
pub struct Tracing {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    file_log_settings: FileLogSettings,
    otlp_trace_settings: OtlpTraceSettings,

    tracer_provider: Option<SdkTracerProvider>,
}

impl Tracing {
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    pub const FILE_LOG_SUFFIX: &str = "tracing-rs.json";
    pub const OTEL_TRACE_EXPORTER_LEVEL: &str = "OTEL_TRACE_EXPORTER_LEVEL";

    pub fn builder(service_name: &'static str) -> TracingBuilder {
        TracingBuilder {
            service_name,
            console_log_settings: ConsoleLogSettings::default(),
            file_log_settings: FileLogSettings::default(),
            otlp_trace_settings: OtlpTraceSettings::default(),
        }
    }

    /// Subscribers configured from [`TelemetryOptions`], with every level
    /// defaulting to `INFO`.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            console_log_disabled,
            file_log_directory,
            file_log_rotation_period,
            otel_trace_exporter_enabled,
        } = options;

        Self::builder(service_name)
            .with_console_output((Self::CONSOLE_LOG_LEVEL, LevelFilter::INFO, !console_log_disabled))
            .with_file_output(file_log_directory.map(|log_directory| {
                Settings::builder()
                    .with_environment_variable(Self::FILE_LOG_LEVEL)
                    .with_default_level(LevelFilter::INFO)
                    .file_log_settings_builder(log_directory, Self::FILE_LOG_SUFFIX)
                    .with_rotation_period(file_log_rotation_period.unwrap_or_default())
                    .build()
            }))
            .with_otlp_trace_exporter((
                Self::OTEL_TRACE_EXPORTER_LEVEL,
                LevelFilter::INFO,
                otel_trace_exporter_enabled,
            ))
            .build()
    }

    /// Installs the enabled subscribers as the global default.
    pub fn init(mut self) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

        if let ConsoleLogSettings::Enabled { common_settings } = &self.console_log_settings {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_filter(env_filter(common_settings))
                    .boxed(),
            );
        }

        if let FileLogSettings::Enabled {
            common_settings,
            file_log_dir,
            rotation_period,
            filename_suffix,
        } = &self.file_log_settings
        {
            let file_appender = RollingFileAppender::builder()
                .rotation(rotation_period.clone())
                .filename_prefix(self.service_name)
                .filename_suffix(filename_suffix)
                .build(file_log_dir)
                .context(InitRollingFileAppenderSnafu)?;

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_filter(env_filter(common_settings))
                    .boxed(),
            );
        }

        if let OtlpTraceSettings::Enabled { common_settings } = &self.otlp_trace_settings {
            // The exporter's own HTTP/2 client would otherwise trace itself
            let filter = env_filter(common_settings)
                .add_directive("h2=off".parse().expect("h2 directive is valid"));

            let trace_exporter = SpanExporter::builder()
                .with_tonic()
                .build()
                .context(InstallOtelTraceExporterSnafu)?;

            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(trace_exporter)
                .with_resource(Resource::builder().with_service_name(self.service_name).build())
                .build();

            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer_provider.tracer(self.service_name))
                    .with_filter(filter)
                    .boxed(),
            );
            self.tracer_provider = Some(tracer_provider);

            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        // Returning self keeps Drop from shutting the exporter down right away
        Ok(self)
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        tracing::debug!(
            opentelemetry.tracing.enabled = self.otlp_trace_settings.is_enabled(),
            "shutting down opentelemetry OTLP providers"
        );

        if let Some(tracer_provider) = &self.tracer_provider
            && let Err(error) = tracer_provider.shutdown()
        {
            tracing::error!(%error, "unable to shutdown TracerProvider");
        }
    }
}

/// For building [`Tracing`], see [`Tracing::builder`].
pub struct TracingBuilder {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    file_log_settings: FileLogSettings,
    otlp_trace_settings: OtlpTraceSettings,
}

impl TracingBuilder {
    pub fn with_console_output(mut self, settings: impl Into<ConsoleLogSettings>) -> Self {
        self.console_log_settings = settings.into();
        self
    }

    pub fn with_file_output(mut self, settings: impl Into<FileLogSettings>) -> Self {
        self.file_log_settings = settings.into();
        self
    }

    pub fn with_otlp_trace_exporter(mut self, settings: impl Into<OtlpTraceSettings>) -> Self {
        self.otlp_trace_settings = settings.into();
        self
    }

    pub fn build(self) -> Tracing {
        Tracing {
            service_name: self.service_name,
            console_log_settings: self.console_log_settings,
            file_log_settings: self.file_log_settings,
            otlp_trace_settings: self.otlp_trace_settings,
            tracer_provider: None,
        }
    }
}

fn env_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(settings.environment_variable)
        .with_default_directive(settings.default_level.into())
        .from_env_lossy()
}

/// Telemetry settings of a binary, usable as CLI arguments with the `clap`
/// feature.
///
/// Every argument can also be set through the environment variable of the
/// same name, e.g. `CONSOLE_LOG_DISABLED`.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disables console output.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Enables logging to rolling files located in the specified DIRECTORY.
    #[cfg_attr(feature = "clap", arg(long, env, value_name = "DIRECTORY", group = "file_log"))]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(feature = "clap", arg(long, env, value_name = "PERIOD", requires = "file_log"))]
    pub file_log_rotation_period: Option<RotationPeriod>,

    /// Enables exporting traces via OTLP.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub otel_trace_exporter_enabled: bool,
}

#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn builder_basic_construction() {
        let tracing = Tracing::builder("test").build();

        assert_eq!(tracing.service_name, "test");
        assert!(tracing.console_log_settings.is_disabled());
        assert!(tracing.file_log_settings.is_disabled());
        assert!(tracing.otlp_trace_settings.is_disabled());
    }

    #[test]
    fn last_console_output_wins() {
        let tracing = Tracing::builder("test")
            .with_console_output(("ABC_A", LevelFilter::TRACE))
            .with_console_output(
                Settings::builder()
                    .with_environment_variable("ABC_B")
                    .with_default_level(LevelFilter::DEBUG)
                    .build(),
            )
            .build();

        assert_eq!(
            tracing.console_log_settings,
            ConsoleLogSettings::Enabled {
                common_settings: Settings {
                    environment_variable: "ABC_B",
                    default_level: LevelFilter::DEBUG,
                },
            }
        );
    }

    #[rstest]
    #[case(false, None, false)]
    #[case(true, Some(PathBuf::from("/logs")), true)]
    fn pre_configured(
        #[case] console_log_disabled: bool,
        #[case] file_log_directory: Option<PathBuf>,
        #[case] otel_trace_exporter_enabled: bool,
    ) {
        let tracing = Tracing::pre_configured("release-manifest", TelemetryOptions {
            console_log_disabled,
            file_log_directory: file_log_directory.clone(),
            file_log_rotation_period: Some(RotationPeriod::Daily),
            otel_trace_exporter_enabled,
        });

        assert_eq!(tracing.console_log_settings.is_enabled(), !console_log_disabled);
        assert_eq!(tracing.otlp_trace_settings.is_enabled(), otel_trace_exporter_enabled);
        match file_log_directory {
            Some(directory) => assert_eq!(
                tracing.file_log_settings,
                FileLogSettings::Enabled {
                    common_settings: Settings {
                        environment_variable: Tracing::FILE_LOG_LEVEL,
                        default_level: LevelFilter::INFO,
                    },
                    file_log_dir: directory,
                    rotation_period: Rotation::DAILY,
                    filename_suffix: Tracing::FILE_LOG_SUFFIX.to_owned(),
                }
            ),
            None => assert!(tracing.file_log_settings.is_disabled()),
        }
    }

    #[rstest]
    #[case("Hourly", RotationPeriod::Hourly)]
    #[case("Never", RotationPeriod::Never)]
    fn parses_rotation_period(#[case] input: &str, #[case] expected: RotationPeriod) {
        assert_eq!(input.parse::<RotationPeriod>(), Ok(expected));
    }

    #[cfg(feature = "clap")]
    #[test]
    fn rotation_requires_a_directory() {
        use clap::Parser;

        #[derive(Debug, Parser)]
        struct Cli {
            #[command(flatten)]
            telemetry: TelemetryOptions,
        }

        assert!(Cli::try_parse_from(["test", "--file-log-rotation-period", "hourly"]).is_err());

        let cli = Cli::try_parse_from([
            "test",
            "--file-log-directory",
            "/logs",
            "--file-log-rotation-period",
            "hourly",
        ])
        .expect("arguments are valid");
        assert_eq!(cli.telemetry.file_log_rotation_period, Some(RotationPeriod::Hourly));
    }
}
