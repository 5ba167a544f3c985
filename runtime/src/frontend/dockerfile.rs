//! Dockerfile parser.
//!
//! Parses a Dockerfile into build stages: each stage's base image, its
//! `ARG` declarations and the other stages or images it pulls files
//! from. Line continuations, comments, heredocs and the `escape` parser
//! directive are honored; instructions that cannot reference images are only
//! checked for being known.

use std::collections::VecDeque;

use dockersource_core::error::{Result, WrapperError};

/// Instructions accepted by the Dockerfile syntax.
const KNOWN_INSTRUCTIONS: &[&str] = &[
    "ADD",
    "ARG",
    "CMD",
    "COPY",
    "ENTRYPOINT",
    "ENV",
    "EXPOSE",
    "FROM",
    "HEALTHCHECK",
    "LABEL",
    "MAINTAINER",
    "ONBUILD",
    "RUN",
    "SHELL",
    "STOPSIGNAL",
    "USER",
    "VOLUME",
    "WORKDIR",
];

/// Instructions that may open heredocs (`<<EOF`).
const HEREDOC_INSTRUCTIONS: &[&str] = &["RUN", "COPY", "ADD"];

/// `ARG <name>[=<default>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDecl {
    pub name: String,
    pub default: Option<String>,
}

/// A single Dockerfile instruction, reduced to what matters for
/// reference discovery.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `FROM [--platform=<p>] <image> [AS <alias>]`
    From {
        image: String,
        alias: Option<String>,
        platform: Option<String>,
    },
    /// `ARG <name>[=<default>] ...`
    Arg(Vec<ArgDecl>),
    /// `COPY --from=<stage|image>` or `RUN --mount=...,from=<stage|image>`
    Uses { from: Vec<String> },
    /// Any other known instruction
    Other { keyword: String },
}

/// One build stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// `AS` name, if any
    pub name: Option<String>,
    /// Base image or stage name as written
    pub base: String,
    pub platform: Option<String>,
    /// `ARG`s declared inside the stage
    pub args: Vec<ArgDecl>,
    /// Stages or images files are taken from, as written
    pub dependencies: Vec<String>,
}

impl Stage {
    pub fn has_name(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .map_or(false, |n| n.eq_ignore_ascii_case(name))
    }
}

/// Parsed Dockerfile.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    /// `ARG`s declared before the first `FROM`
    pub global_args: Vec<ArgDecl>,
    pub stages: Vec<Stage>,
}

impl Dockerfile {
    /// Parse a Dockerfile from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let content = std::str::from_utf8(data).map_err(|e| {
            WrapperError::FrontendError(format!("Dockerfile is not valid UTF-8: {}", e))
        })?;
        Self::parse(content)
    }

    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let escape = escape_directive(content);
        let mut global_args = Vec::new();
        let mut stages: Vec<Stage> = Vec::new();

        for (line_num, line) in join_continuation_lines(content, escape) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match parse_instruction(trimmed, line_num)? {
                Instruction::From {
                    image,
                    alias,
                    platform,
                } => stages.push(Stage {
                    name: alias,
                    base: image,
                    platform,
                    args: Vec::new(),
                    dependencies: Vec::new(),
                }),
                Instruction::Arg(decls) => match stages.last_mut() {
                    Some(stage) => stage.args.extend(decls),
                    None => global_args.extend(decls),
                },
                Instruction::Uses { from } => match stages.last_mut() {
                    Some(stage) => stage.dependencies.extend(from),
                    None => return Err(before_from(line_num)),
                },
                Instruction::Other { .. } => {
                    if stages.is_empty() {
                        return Err(before_from(line_num));
                    }
                }
            }
        }

        if stages.is_empty() {
            return Err(WrapperError::FrontendError(
                "Dockerfile contains no build stage (missing FROM)".to_string(),
            ));
        }

        Ok(Dockerfile {
            global_args,
            stages,
        })
    }
}

fn before_from(line_num: usize) -> WrapperError {
    WrapperError::FrontendError(format!(
        "Line {}: only ARG may appear before the first FROM",
        line_num
    ))
}

/// Escape character from a leading `# escape=<c>` directive, `\` otherwise.
fn escape_directive(content: &str) -> char {
    for line in content.lines() {
        let Some(directive) = line.trim().strip_prefix('#') else {
            break;
        };
        let Some((key, value)) = directive.split_once('=') else {
            break;
        };
        if key.trim().eq_ignore_ascii_case("escape") {
            let value = value.trim();
            if value == "`" {
                return '`';
            }
        }
    }
    '\\'
}

/// Join continued lines into logical lines, keeping the starting line number.
///
/// Comment and blank lines inside a continuation are dropped, and so are
/// heredoc bodies.
fn join_continuation_lines(content: &str, escape: char) -> Vec<(usize, String)> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut heredocs: VecDeque<String> = VecDeque::new();

    for (idx, line) in content.lines().enumerate() {
        if let Some(terminator) = heredocs.front() {
            if line.trim_start_matches('\t').trim_end() == terminator.as_str() {
                heredocs.pop_front();
            }
            continue;
        }

        let continuing = !current.is_empty();
        if continuing {
            let t = line.trim();
            if t.is_empty() || t.starts_with('#') {
                continue;
            }
        } else {
            start = idx + 1;
        }

        let trimmed_end = line.trim_end();
        if let Some(body) = trimmed_end.strip_suffix(escape) {
            current.push_str(body.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            heredocs.extend(heredoc_terminators(&current));
            logical_lines.push((start, std::mem::take(&mut current)));
        }
    }

    // Trailing continuation without final line
    if !current.is_empty() {
        logical_lines.push((start, current));
    }

    logical_lines
}

/// Terminators of the heredocs a `RUN`, `COPY` or `ADD` line opens, in order.
///
/// Accepts `<<WORD`, `<<-WORD` and the quoted `<<"WORD"` / `<<'WORD'` forms.
fn heredoc_terminators(line: &str) -> Vec<String> {
    let (keyword, mut rest) = split_first_word(line);
    if !HEREDOC_INSTRUCTIONS
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
    {
        return Vec::new();
    }

    let mut terminators = Vec::new();
    while let Some(pos) = rest.find("<<") {
        rest = &rest[pos + 2..];
        let word = rest.strip_prefix('-').unwrap_or(rest);
        let (quote, word) = match word.chars().next() {
            Some(q @ ('"' | '\'')) => (Some(q), &word[1..]),
            _ => (None, word),
        };
        let end = word
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(word.len());
        let closed = quote.map_or(true, |q| word[end..].starts_with(q));
        let word = &word[..end];
        if closed && word.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            terminators.push(word.to_string());
        }
    }
    terminators
}

/// Parse a single logical line into an Instruction.
fn parse_instruction(line: &str, line_num: usize) -> Result<Instruction> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    match keyword_upper.as_str() {
        "FROM" => parse_from(rest, line_num),
        "ARG" => parse_arg(rest, line_num),
        "COPY" => Ok(parse_copy(rest)),
        "RUN" => Ok(parse_run(rest)),
        k if KNOWN_INSTRUCTIONS.contains(&k) => Ok(Instruction::Other {
            keyword: keyword_upper,
        }),
        _ => Err(WrapperError::FrontendError(format!(
            "Line {}: Unknown instruction '{}'",
            line_num, keyword
        ))),
    }
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Split leading `--name[=value]` flags off an instruction's arguments.
fn split_flags(rest: &str) -> (Vec<(&str, Option<&str>)>, &str) {
    let mut flags = Vec::new();
    let mut rest = rest.trim_start();
    while rest.starts_with("--") {
        let (word, after) = split_first_word(rest);
        let flag = &word[2..];
        flags.push(match flag.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag, None),
        });
        rest = after;
    }
    (flags, rest)
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<Instruction> {
    let (flags, rest) = split_flags(rest);
    let platform = flags
        .iter()
        .find(|(name, _)| *name == "platform")
        .and_then(|(_, value)| value.map(str::to_string));

    let parts: Vec<&str> = rest.split_whitespace().collect();
    let (image, alias) = match parts.as_slice() {
        [image] => (image.to_string(), None),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => {
            (image.to_string(), Some(alias.to_string()))
        }
        [] => {
            return Err(WrapperError::FrontendError(format!(
                "Line {}: FROM requires an image argument",
                line_num
            )))
        }
        _ => {
            return Err(WrapperError::FrontendError(format!(
                "Line {}: FROM requires either one or three arguments",
                line_num
            )))
        }
    };

    Ok(Instruction::From {
        image,
        alias,
        platform,
    })
}

fn parse_arg(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(WrapperError::FrontendError(format!(
            "Line {}: ARG requires a name",
            line_num
        )));
    }

    let decls = split_outside_quotes(rest)
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((name, default)) => ArgDecl {
                name: name.to_string(),
                default: Some(unquote(default)),
            },
            None => ArgDecl {
                name: word.to_string(),
                default: None,
            },
        })
        .collect();
    Ok(Instruction::Arg(decls))
}

fn parse_copy(rest: &str) -> Instruction {
    let (flags, _) = split_flags(rest);
    let from = flags
        .into_iter()
        .filter(|(name, _)| *name == "from")
        .filter_map(|(_, value)| value.map(str::to_string))
        .collect::<Vec<_>>();
    if from.is_empty() {
        Instruction::Other {
            keyword: "COPY".to_string(),
        }
    } else {
        Instruction::Uses { from }
    }
}

fn parse_run(rest: &str) -> Instruction {
    let (flags, _) = split_flags(rest);
    let from = flags
        .into_iter()
        .filter(|(name, _)| *name == "mount")
        .filter_map(|(_, value)| value)
        .filter_map(|mount| {
            mount
                .split(',')
                .find_map(|kv| kv.strip_prefix("from="))
                .map(str::to_string)
        })
        .collect::<Vec<_>>();
    if from.is_empty() {
        Instruction::Other {
            keyword: "RUN".to_string(),
        }
    } else {
        Instruction::Uses { from }
    }
}

// --- Helpers ---

/// Split on whitespace that is not inside single or double quotes.
fn split_outside_quotes(s: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut quote = None;
    let mut start = None;

    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                start.get_or_insert(i);
            }
            None if c.is_whitespace() => {
                if let Some(begin) = start.take() {
                    words.push(&s[begin..i]);
                }
            }
            None => {
                start.get_or_insert(i);
            }
        }
    }
    if let Some(begin) = start {
        words.push(&s[begin..]);
    }
    words
}

/// Remove surrounding quotes from a string.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- join_continuation_lines ---

    #[test]
    fn test_join_continuation_simple() {
        let input = "RUN apt-get update && \\\n    apt-get install -y curl";
        let lines = join_continuation_lines(input, '\\');
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, 1);
        assert!(lines[0].1.contains("apt-get install"));
    }

    #[test]
    fn test_join_continuation_skips_inner_comments() {
        let input = "FROM alpine\nRUN a \\\n# note\n\n    b\nRUN c";
        let lines = join_continuation_lines(input, '\\');
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].0, 2);
        assert!(lines[1].1.contains('b'));
        assert_eq!(lines[2].0, 6);
    }

    #[test]
    fn test_escape_directive() {
        let input = "# escape=`\nFROM mcr.microsoft.com/windows/servercore\nRUN dir `\n    c:\\";
        assert_eq!(escape_directive(input), '`');
        let df = Dockerfile::parse(input).unwrap();
        assert_eq!(df.stages.len(), 1);
    }

    #[test]
    fn test_heredoc_bodies_are_skipped() {
        let input = "\
FROM alpine
RUN <<EOF
apk add curl
FROM not-a-stage
EOF
COPY <<-\"CONF\" <<'ENV' /etc/
\tlisten 80
\tCONF
KEY=value
ENV
FROM scratch
";
        let df = Dockerfile::parse(input).unwrap();
        assert_eq!(df.stages.len(), 2);
        assert_eq!(df.stages[0].base, "alpine");
        assert_eq!(df.stages[1].base, "scratch");
    }

    #[test]
    fn test_heredoc_terminators() {
        assert_eq!(heredoc_terminators("RUN <<EOF"), vec!["EOF"]);
        assert_eq!(
            heredoc_terminators("run --mount=type=cache,target=/c <<-'A_1' python3 <<\"B\""),
            vec!["A_1", "B"]
        );
        assert_eq!(
            heredoc_terminators("COPY <<FILE1 <<FILE2 /dest/"),
            vec!["FILE1", "FILE2"]
        );
        assert!(heredoc_terminators("ENV X=<<EOF").is_empty());
        assert!(heredoc_terminators("RUN echo \"a << b\"").is_empty());
        assert!(heredoc_terminators("RUN cat <<\"EOF").is_empty());
    }

    // --- parse_from ---

    #[test]
    fn test_parse_from_simple() {
        let result = parse_from("alpine:3.19", 1).unwrap();
        assert_eq!(
            result,
            Instruction::From {
                image: "alpine:3.19".to_string(),
                alias: None,
                platform: None,
            }
        );
    }

    #[test]
    fn test_parse_from_with_alias_and_platform() {
        let result = parse_from("--platform=$BUILDPLATFORM golang:1.21 as builder", 1).unwrap();
        assert_eq!(
            result,
            Instruction::From {
                image: "golang:1.21".to_string(),
                alias: Some("builder".to_string()),
                platform: Some("$BUILDPLATFORM".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_from_invalid() {
        assert!(parse_from("", 1).is_err());
        assert!(parse_from("alpine AS", 1).is_err());
    }

    // --- parse_arg ---

    #[test]
    fn test_parse_arg_forms() {
        let result = parse_arg("VERSION=\"1.0\" BASE", 1).unwrap();
        assert_eq!(
            result,
            Instruction::Arg(vec![
                ArgDecl {
                    name: "VERSION".to_string(),
                    default: Some("1.0".to_string()),
                },
                ArgDecl {
                    name: "BASE".to_string(),
                    default: None,
                },
            ])
        );
        assert!(parse_arg("", 1).is_err());
    }

    #[test]
    fn test_parse_arg_quoted_default_with_spaces() {
        let result = parse_arg("BASE=\"my image\" TAG='a b' LAST", 1).unwrap();
        assert_eq!(
            result,
            Instruction::Arg(vec![
                ArgDecl {
                    name: "BASE".to_string(),
                    default: Some("my image".to_string()),
                },
                ArgDecl {
                    name: "TAG".to_string(),
                    default: Some("a b".to_string()),
                },
                ArgDecl {
                    name: "LAST".to_string(),
                    default: None,
                },
            ])
        );
    }

    #[test]
    fn test_split_outside_quotes() {
        assert_eq!(
            split_outside_quotes("  A=\"x y\"   B='c  d'\tC "),
            vec!["A=\"x y\"", "B='c  d'", "C"]
        );
        assert!(split_outside_quotes("   ").is_empty());
    }

    // --- parse_copy / parse_run ---

    #[test]
    fn test_parse_copy_from_stage() {
        assert_eq!(
            parse_copy("--from=builder --chown=1000 /app/bin /usr/bin/"),
            Instruction::Uses {
                from: vec!["builder".to_string()]
            }
        );
        assert_eq!(
            parse_copy("src/ /app/"),
            Instruction::Other {
                keyword: "COPY".to_string()
            }
        );
    }

    #[test]
    fn test_parse_run_mount_from() {
        assert_eq!(
            parse_run("--mount=type=bind,from=tools,target=/t make"),
            Instruction::Uses {
                from: vec!["tools".to_string()]
            }
        );
        assert!(matches!(
            parse_run("--mount=type=cache,target=/root/.cache go build"),
            Instruction::Other { .. }
        ));
    }

    // --- Dockerfile::parse ---

    #[test]
    fn test_parse_multi_stage() {
        let content = r#"
# syntax=docker/dockerfile:1
ARG GO_VERSION=1.21
FROM golang:${GO_VERSION} AS builder
ARG TARGETOS
WORKDIR /src
COPY . .
RUN go build -o /out/app

FROM scratch
COPY --from=builder /out/app /app
ENTRYPOINT ["/app"]
"#;
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(
            df.global_args,
            vec![ArgDecl {
                name: "GO_VERSION".to_string(),
                default: Some("1.21".to_string())
            }]
        );
        assert_eq!(df.stages.len(), 2);
        assert_eq!(df.stages[0].name.as_deref(), Some("builder"));
        assert_eq!(df.stages[0].base, "golang:${GO_VERSION}");
        assert_eq!(df.stages[0].args.len(), 1);
        assert_eq!(df.stages[1].name, None);
        assert_eq!(df.stages[1].dependencies, vec!["builder"]);
        assert!(df.stages[0].has_name("BUILDER"));
    }

    #[test]
    fn test_parse_no_from() {
        assert!(Dockerfile::parse("ARG X=1\n").is_err());
        assert!(Dockerfile::parse("").is_err());
    }

    #[test]
    fn test_parse_instruction_before_from() {
        assert!(Dockerfile::parse("RUN echo\nFROM alpine").is_err());
    }

    #[test]
    fn test_parse_unknown_instruction() {
        assert!(Dockerfile::parse("FROM alpine\nFROBNICATE now").is_err());
    }

    #[test]
    fn test_from_bytes_rejects_invalid_utf8() {
        assert!(Dockerfile::from_bytes(&[0x46, 0x52, 0xFF]).is_err());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"hello\""), "hello");
        assert_eq!(unquote("'hello'"), "hello");
        assert_eq!(unquote("hello"), "hello");
        assert_eq!(unquote("\"hello'"), "\"hello'");
        assert_eq!(unquote("\""), "\"");
    }
}
