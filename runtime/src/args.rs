//! Docker command line classification.
//!
//! A single left-to-right pass over the arguments (without argv[0]) that
//! decides whether the invocation is an image build and collects what the
//! orchestrator needs to rewrite it.

use std::collections::HashMap;

use dockersource_core::config::parse_bool;
use dockersource_core::error::{Result, WrapperError};
use dockersource_core::WrapperConfig;

use crate::context::{BuildContext, STDIN_CONTEXT};

/// Default description file name inside the context.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

const BUILD_COMMAND: &str = "build";
const BUILDX_COMMAND: &str = "buildx";

/// Positionals that may precede `build` in a build invocation.
const BUILD_PARENTS: &[&str] = &[BUILDX_COMMAND, "image", "builder"];

/// Flags that never take a separate value, except a literal boolean.
const KNOWN_BOOL_FLAGS: &[&str] = &[
    "--load",
    "--no-cache",
    "--pull",
    "--push",
    "-q",
    "--quiet",
    "--rm",
    "--force-rm",
    "--tls",
    "--tlsverify",
    "-D",
    "--debug",
];

/// Short build flags whose value may be attached, as in `-f-` or `-tapp`.
const SHORT_VALUE_FLAGS: &[&str] = &["-f", "-t", "-o"];

/// Description file flags; `-` reads the description from stdin.
const FILE_FLAGS: &[&str] = &["-f", "--file"];

/// Everything learned about one docker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationState {
    /// `--build-arg` values
    pub build_args: HashMap<String, String>,

    /// `-f/--file`, relative to the context unless absolute
    pub dockerfile_name: String,

    /// This is an image build
    pub build: bool,

    /// Index of the `build` token
    pub build_pos: usize,

    /// `buildx` preceded `build`
    pub buildx: bool,

    pub context: Option<BuildContext>,

    /// `--metadata-file` given by the caller
    pub metadata_file: Option<String>,

    /// Argument positions to drop, ascending
    pub filter_flags: Vec<usize>,

    /// Tags forced by configuration
    pub tags: Vec<String>,

    /// Outputs forced by configuration
    pub outputs: Vec<String>,
}

impl InvocationState {
    /// Empty state carrying the forced tags and outputs.
    pub fn new(config: &WrapperConfig) -> Self {
        Self {
            build_args: HashMap::new(),
            dockerfile_name: DEFAULT_DOCKERFILE.to_string(),
            build: false,
            build_pos: 0,
            buildx: false,
            context: None,
            metadata_file: None,
            filter_flags: Vec::new(),
            tags: config.tags.clone(),
            outputs: config.outputs.clone(),
        }
    }

    /// Record a flag. Returns `(consumed_next, omit)`.
    fn handle_flag(&mut self, arg: &str, next: Option<&str>) -> (bool, bool) {
        let (name, inline) = split_flag(arg);
        let value = inline.or(next).unwrap_or_default();

        let mut omit = false;
        if self.build {
            match name {
                "--build-arg" => {
                    let (key, v) = value.split_once('=').unwrap_or((value, ""));
                    tracing::debug!(key, value = v, "Setting build arg");
                    self.build_args.insert(key.to_string(), v.to_string());
                }
                "-f" | "--file" => self.dockerfile_name = value.to_string(),
                "--metadata-file" => {
                    tracing::debug!(path = value, "Caller requested metadata file");
                    self.metadata_file = Some(value.to_string());
                }
                "-t" | "--tag" => omit = !self.tags.is_empty(),
                "-o" | "--output" => {
                    omit = !self.outputs.is_empty()
                        || (!self.tags.is_empty() && value.contains("type=registry"));
                }
                _ => {}
            }
            if omit {
                tracing::debug!(flag = name, value, "Filtering flag");
            }
        }

        let consumed = inline.is_none() && next.map_or(false, |next| takes_value(name, next));
        (consumed, omit)
    }
}

/// Split a flag into its name and inline value.
///
/// Handles `--name=value`, `-n=value` and the attached short form `-nvalue`
/// of the short flags in [`SHORT_VALUE_FLAGS`].
fn split_flag(arg: &str) -> (&str, Option<&str>) {
    if !arg.starts_with("--") && arg.len() > 2 {
        if let Some(name) = SHORT_VALUE_FLAGS.iter().find(|f| arg.starts_with(**f)) {
            let value = &arg[name.len()..];
            return (*name, Some(value.strip_prefix('=').unwrap_or(value)));
        }
    }
    match arg.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (arg, None),
    }
}

/// Whether `next` is the separate value of flag `name`.
fn takes_value(name: &str, next: &str) -> bool {
    if KNOWN_BOOL_FLAGS.contains(&name) {
        return parse_bool(next).is_some();
    }
    if FILE_FLAGS.contains(&name) && next == STDIN_CONTEXT {
        return true;
    }
    !next.is_empty() && !next.starts_with('-')
}

/// Classify docker arguments, excluding argv[0].
pub fn classify<S: AsRef<str>>(args: &[S], config: &WrapperConfig) -> Result<InvocationState> {
    let mut state = InvocationState::new(config);
    let mut positionals = 0usize;
    let mut parents_only = true;
    let mut skip_next = false;

    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if skip_next {
            skip_next = false;
            continue;
        }

        if !state.build {
            if arg == BUILD_COMMAND && parents_only {
                state.build = true;
                state.build_pos = i;
                continue;
            }
            if arg == BUILDX_COMMAND && positionals == 0 {
                state.buildx = true;
                positionals += 1;
                continue;
            }
        }

        if arg.starts_with('-') && arg != STDIN_CONTEXT {
            let next = args.get(i + 1).map(AsRef::as_ref);
            let (consumed, omit) = state.handle_flag(arg, next);
            if omit {
                state.filter_flags.push(i);
                if consumed {
                    state.filter_flags.push(i + 1);
                }
            }
            skip_next = consumed;
            continue;
        }

        if state.build {
            if let Some(first) = &state.context {
                return Err(WrapperError::MultipleContexts {
                    first: first.to_string(),
                    second: arg.to_string(),
                });
            }
            state.context = Some(BuildContext::from_arg(arg));
        } else {
            positionals += 1;
            parents_only &= BUILD_PARENTS.contains(&arg);
        }
    }

    Ok(state)
}
