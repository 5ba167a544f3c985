//! dockersource CLI - transparent docker wrapper and substitution generator.

pub mod commands;
