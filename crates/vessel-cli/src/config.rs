//! Separation of configuration flags from the subcommand line.
//!
//! Configuration flags are handed to `ortho_config`, which rejects anything
//! it does not know, so they must be split off before clap sees the rest.
//! They are only recognised ahead of the subcommand; after it every token
//! belongs to the subcommand.

use std::ffi::{OsStr, OsString};

use vessel_config::Config;

use crate::errors::AppError;

/// Long flags understood by the configuration loader.
///
/// Must list every field of [`Config`] in kebab case, plus `--config-path`.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--sysfs",
    "--bwrap",
    "--terminate-wait-ms",
    "--terminate-kill-ms",
    "--symlink-limit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Configuration arguments and the position where the subcommand begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

/// Collects the leading configuration flags of `args`.
///
/// `args[0]` is the program name and is copied to both halves.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut tokens = args.iter();
    let Some(program) = tokens.next() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut awaiting_value = false;
    for argument in tokens {
        if awaiting_value {
            awaiting_value = false;
        } else {
            match classify(argument) {
                FlagAction::Include { needs_value } => awaiting_value = needs_value,
                FlagAction::Stop => break,
            }
        }
        config_arguments.push(argument.clone());
    }

    let command_start = config_arguments.len();
    ConfigArgumentSplit {
        config_arguments,
        command_start,
    }
}

/// Rebuilds the argument list clap parses: the program name and the tokens
/// after the configuration flags.
pub(crate) fn command_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.iter().skip(split.command_start))
        .cloned()
        .collect()
}

/// Loads the layered configuration from the split-off flags.
pub(crate) fn load(split: &ConfigArgumentSplit) -> Result<Config, AppError> {
    Config::load_from_args(split.config_arguments.iter().cloned())
        .map_err(AppError::LoadConfiguration)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn argv(tokens: &[&str]) -> Vec<OsString> {
        tokens.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case("--log-filter", FlagAction::Include { needs_value: true })]
    #[case("--config-path", FlagAction::Include { needs_value: true })]
    #[case("plan", FlagAction::Stop)]
    #[case("--provider", FlagAction::Stop)]
    #[case("--log-filtering=debug", FlagAction::Stop)]
    fn flags_are_classified(#[case] token: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(token)), expected);
    }

    #[test]
    fn leading_flags_and_their_values_are_split_off() {
        let args = argv(&[
            "vessel",
            "--sysfs",
            "read-write",
            "--log-format=compact",
            "plan",
            "--provider",
            "/",
        ]);

        let split = split_config_arguments(&args);

        assert_eq!(
            split.config_arguments,
            argv(&["vessel", "--sysfs", "read-write", "--log-format=compact"])
        );
        assert_eq!(
            command_arguments(&args, &split),
            argv(&["vessel", "plan", "--provider", "/"])
        );
    }

    #[test]
    fn flags_after_the_subcommand_belong_to_it() {
        let args = argv(&["vessel", "run", "--provider", "/", "--", "env", "--bwrap", "x"]);

        let split = split_config_arguments(&args);

        assert_eq!(split.config_arguments, argv(&["vessel"]));
        assert_eq!(command_arguments(&args, &split), args);
    }

    #[test]
    fn a_value_that_looks_like_a_subcommand_is_still_a_value() {
        let args = argv(&["vessel", "--log-filter", "plan", "plan"]);

        let split = split_config_arguments(&args);

        assert_eq!(split.command_start, 3);
        assert_eq!(command_arguments(&args, &split), argv(&["vessel", "plan"]));
    }

    #[test]
    fn empty_arguments_yield_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert_eq!(command_arguments(&[], &split), Vec::<OsString>::new());
    }
}
