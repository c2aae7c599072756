//! Settings of the individual subscribers [`Tracing`][crate::Tracing] can install.
//!
//! Every subscriber is either disabled or enabled with [`Settings`]. Besides
//! the builders, the console and trace settings convert from tuples for
//! basic configuration:
//!
//! - `(env_var, default_level)` enables the subscriber,
//! - `(env_var, default_level, enabled)` toggles it at runtime.

use std::path::PathBuf;

/// Re-export to save the end crate an explicit dependency on `tracing-appender`.
pub use tracing_appender::rolling::Rotation;
use tracing::level_filters::LevelFilter;

/// General settings that apply to any subscriber.
#[derive(Debug, PartialEq)]
pub struct Settings {
    /// The environment variable used to set the [`LevelFilter`].
    ///
    /// When the environment variable is set, it overrides [`Self::default_level`].
    pub environment_variable: &'static str,

    /// The [`LevelFilter`] to fall back to if [`Self::environment_variable`] is not set.
    pub default_level: LevelFilter,
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }
}

/// For building [`Settings`] and the subscriber specific settings.
pub struct SettingsBuilder {
    environment_variable: &'static str,
    default_level: LevelFilter,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            environment_variable: "RUST_LOG",
            default_level: LevelFilter::OFF,
        }
    }
}

impl SettingsBuilder {
    /// Defaults to `RUST_LOG`.
    pub fn with_environment_variable(mut self, name: &'static str) -> Self {
        self.environment_variable = name;
        self
    }

    /// Defaults to [`LevelFilter::OFF`].
    pub fn with_default_level(mut self, level: impl Into<LevelFilter>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn build(self) -> Settings {
        Settings {
            environment_variable: self.environment_variable,
            default_level: self.default_level,
        }
    }

    /// Continues with the settings of the rolling file subscriber, writing
    /// into `file_log_dir`.
    pub fn file_log_settings_builder(
        self,
        file_log_dir: impl Into<PathBuf>,
        filename_suffix: impl Into<String>,
    ) -> FileLogSettingsBuilder {
        FileLogSettingsBuilder {
            common_settings: self.build(),
            file_log_dir: file_log_dir.into(),
            filename_suffix: filename_suffix.into(),
            rotation_period: Rotation::NEVER,
        }
    }
}

/// Whether a subscriber is installed.
pub trait SettingsToggle {
    fn is_enabled(&self) -> bool;

    fn is_disabled(&self) -> bool {
        !self.is_enabled()
    }
}

macro_rules! toggled_settings {
    ($($(#[$meta:meta])* $name:ident;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Default, PartialEq)]
            pub enum $name {
                #[default]
                Disabled,
                Enabled { common_settings: Settings },
            }

            impl SettingsToggle for $name {
                fn is_enabled(&self) -> bool {
                    matches!(self, Self::Enabled { .. })
                }
            }

            impl From<Settings> for $name {
                fn from(common_settings: Settings) -> Self {
                    Self::Enabled { common_settings }
                }
            }

            impl From<(&'static str, LevelFilter)> for $name {
                fn from((environment_variable, default_level): (&'static str, LevelFilter)) -> Self {
                    Self::Enabled {
                        common_settings: Settings {
                            environment_variable,
                            default_level,
                        },
                    }
                }
            }

            impl From<(&'static str, LevelFilter, bool)> for $name {
                fn from(
                    (environment_variable, default_level, enabled): (&'static str, LevelFilter, bool),
                ) -> Self {
                    if enabled {
                        (environment_variable, default_level).into()
                    } else {
                        Self::Disabled
                    }
                }
            }
        )+
    };
}

toggled_settings! {
    /// Settings of the plain console subscriber.
    ///
    /// ANSI colors can be disabled at runtime by setting `NO_COLOR`.
    ConsoleLogSettings;
    /// Settings of the OTLP span exporter.
    OtlpTraceSettings;
}

/// Settings of the subscriber writing JSON logs into rolling files.
#[derive(Debug, Default, PartialEq)]
pub enum FileLogSettings {
    #[default]
    Disabled,
    Enabled {
        common_settings: Settings,
        file_log_dir: PathBuf,
        rotation_period: Rotation,
        filename_suffix: String,
    },
}

impl SettingsToggle for FileLogSettings {
    fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

impl<T> From<Option<T>> for FileLogSettings
where
    T: Into<Self>,
{
    fn from(settings: Option<T>) -> Self {
        settings.map_or_else(Self::default, Into::into)
    }
}

/// For building [`FileLogSettings`].
///
/// <div class="warning">
/// Do not use directly, instead use [`SettingsBuilder::file_log_settings_builder`].
/// </div>
pub struct FileLogSettingsBuilder {
    common_settings: Settings,
    file_log_dir: PathBuf,
    filename_suffix: String,
    rotation_period: Rotation,
}

impl FileLogSettingsBuilder {
    /// Defaults to [`Rotation::NEVER`].
    pub fn with_rotation_period(mut self, rotation_period: impl Into<Rotation>) -> Self {
        self.rotation_period = rotation_period.into();
        self
    }

    pub fn build(self) -> FileLogSettings {
        FileLogSettings::Enabled {
            common_settings: self.common_settings,
            file_log_dir: self.file_log_dir,
            rotation_period: self.rotation_period,
            filename_suffix: self.filename_suffix,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn builds_settings() {
        let settings = Settings::builder()
            .with_environment_variable("hello")
            .with_default_level(LevelFilter::DEBUG)
            .build();

        assert_eq!(
            settings,
            Settings {
                environment_variable: "hello",
                default_level: LevelFilter::DEBUG,
            }
        );
    }

    #[test]
    fn builds_file_log_settings() {
        let settings = Settings::builder()
            .with_environment_variable("FILE_LOG")
            .with_default_level(LevelFilter::INFO)
            .file_log_settings_builder("/logs", "tracing-rs.json")
            .with_rotation_period(Rotation::HOURLY)
            .build();

        assert_eq!(
            settings,
            FileLogSettings::Enabled {
                common_settings: Settings {
                    environment_variable: "FILE_LOG",
                    default_level: LevelFilter::INFO,
                },
                file_log_dir: PathBuf::from("/logs"),
                rotation_period: Rotation::HOURLY,
                filename_suffix: "tracing-rs.json".to_owned(),
            }
        );
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn triples_toggle_subscribers(#[case] enabled: bool) {
        let settings: OtlpTraceSettings = ("OTLP_TRACE", LevelFilter::TRACE, enabled).into();

        assert_eq!(settings.is_enabled(), enabled);
    }

    #[test]
    fn missing_file_settings_disable_the_subscriber() {
        let settings: FileLogSettings = None::<FileLogSettings>.into();

        assert!(settings.is_disabled());
    }
}
