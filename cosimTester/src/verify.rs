//! Checks on captured backend output and memory dumps.
//!
//! Marker semantics: a fixture prints [`INTERRUPT_MARKER`] from its trap
//! handler each time it observes an interrupt. The rest of its output is the
//! text it would print if no interrupt arrived, so removing every marker must
//! give back that text exactly.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::TestError;

pub const INTERRUPT_MARKER: char = '*';
pub const FAILURE_MARKER: &str = "FAIL";

const CHECK_PREFIX: &str = "CHECK:";
const CHECK_NOT_PREFIX: &str = "CHECKN:";

pub fn contains_marker(output: &str, needle: &str) -> bool {
    output.contains(needle)
}

pub fn count_marker(output: &str, marker: char) -> usize {
    output.chars().filter(|&c| c == marker).count()
}

pub fn ends_with_marker(output: &str, marker: char) -> bool {
    output.ends_with(marker)
}

pub fn strip_markers(output: &str, marker: char) -> String {
    output.chars().filter(|&c| c != marker).collect()
}

/// Last line starting with `prefix`, with the prefix removed.
pub fn find_prefixed_line<'a>(output: &'a str, prefix: &str) -> Option<&'a str> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix(prefix))
        .next_back()
}

pub fn expect_contains(output: &str, needle: &str) -> Result<(), TestError> {
    if contains_marker(output, needle) {
        Ok(())
    } else {
        Err(TestError::assertion_with_output(
            format!("expected output to contain {needle:?}"),
            output,
        ))
    }
}

pub fn expect_no_failure(output: &str) -> Result<(), TestError> {
    if output.contains(FAILURE_MARKER) {
        Err(TestError::assertion_with_output(
            format!("output contains {FAILURE_MARKER:?}"),
            output,
        ))
    } else {
        Ok(())
    }
}

/// What an interrupted run must look like.
#[derive(Debug, Clone)]
pub struct InterruptedOutput<'a> {
    pub marker: char,
    pub min_markers: usize,
    /// Output with all markers removed must equal this.
    pub reference: &'a str,
}

impl InterruptedOutput<'_> {
    pub fn check(&self, line: &str) -> Result<(), TestError> {
        let count = count_marker(line, self.marker);
        if count < self.min_markers {
            return Err(TestError::assertion(format!(
                "expected at least {} interrupt markers, found {count} in {line:?}",
                self.min_markers
            )));
        }
        if ends_with_marker(line, self.marker) {
            return Err(TestError::assertion(format!(
                "output ends with an interrupt marker, nothing ran after the last interrupt: {line:?}"
            )));
        }
        let stripped = strip_markers(line, self.marker);
        if stripped != self.reference {
            return Err(TestError::assertion(format!(
                "base string does not match: expected {:?}, got {stripped:?}",
                self.reference
            )));
        }
        Ok(())
    }
}

/// Compares interrupts received from the guest with the expected sequence.
pub fn expect_interrupt_bytes(received: &[u8], expected: &[u8]) -> Result<(), TestError> {
    if received.len() < expected.len() {
        return Err(TestError::assertion(format!(
            "received {} of {} host interrupts: expected {expected:?}, got {received:?}",
            received.len(),
            expected.len()
        )));
    }
    if received != expected {
        return Err(TestError::assertion(format!(
            "wrong host interrupts: expected {expected:?}, got {received:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Directive {
    /// Regex that must match after the previous match.
    Check(String),
    /// Literal that must not appear after the previous match.
    CheckNot(String),
}

fn parse_directives(source: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    for line in source.lines() {
        if let Some(idx) = line.find(CHECK_NOT_PREFIX) {
            let text = line[idx + CHECK_NOT_PREFIX.len()..].trim();
            directives.push(Directive::CheckNot(text.to_string()));
        } else if let Some(idx) = line.find(CHECK_PREFIX) {
            let text = line[idx + CHECK_PREFIX.len()..].trim();
            directives.push(Directive::Check(text.to_string()));
        }
    }
    directives
}

/// Applies the `CHECK:` / `CHECKN:` directives embedded in a fixture
/// source to `output`. A source without any `CHECK:` line is an error.
pub fn check_result(source: &Path, output: &str) -> Result<(), TestError> {
    let text = fs::read_to_string(source)
        .map_err(|e| TestError::io(format!("failed to read {}", source.display()), e))?;
    let directives = parse_directives(&text);
    if !directives.iter().any(|d| matches!(d, Directive::Check(_))) {
        return Err(TestError::assertion(format!(
            "no {CHECK_PREFIX} lines found in {}",
            source.display()
        )));
    }
    apply_directives(&directives, output)
}

/// Like [`check_result`], but a source without directives passes.
pub fn check_optional_directives(source: &Path, output: &str) -> Result<(), TestError> {
    let text = fs::read_to_string(source)
        .map_err(|e| TestError::io(format!("failed to read {}", source.display()), e))?;
    apply_directives(&parse_directives(&text), output)
}

fn apply_directives(directives: &[Directive], output: &str) -> Result<(), TestError> {
    let mut position = 0;
    for directive in directives {
        match directive {
            Directive::Check(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    TestError::assertion(format!("bad {CHECK_PREFIX} pattern {pattern:?}: {e}"))
                })?;
                match regex.find_at(output, position) {
                    Some(found) => position = found.end(),
                    None => {
                        return Err(TestError::assertion_with_output(
                            format!("{CHECK_PREFIX} {pattern} not found at offset {position}"),
                            output,
                        ));
                    }
                }
            }
            Directive::CheckNot(text) => {
                if output[position..].contains(text.as_str()) {
                    return Err(TestError::assertion_with_output(
                        format!("{CHECK_NOT_PREFIX} {text} was found"),
                        output,
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Little-endian 32-bit words read back from a backend memory dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDump {
    base: u32,
    words: Vec<u32>,
}

impl MemoryDump {
    pub fn read(path: &Path, base: u32) -> Result<Self, TestError> {
        let bytes = fs::read(path)
            .map_err(|e| TestError::io(format!("failed to read dump {}", path.display()), e))?;
        Self::from_bytes(&bytes, base)
    }

    pub fn from_bytes(bytes: &[u8], base: u32) -> Result<Self, TestError> {
        if bytes.len() % 4 != 0 {
            return Err(TestError::assertion(format!(
                "dump length {} is not a whole number of words",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { base, words })
    }

    fn address_of(&self, index: usize) -> u32 {
        self.base.wrapping_add((index as u32).wrapping_mul(4))
    }

    /// Checks every word against `expected(index)`, failing on the first
    /// mismatch.
    pub fn verify_words<F>(&self, expected: F) -> Result<(), TestError>
    where
        F: Fn(usize) -> u32,
    {
        if self.words.is_empty() {
            return Err(TestError::assertion("memory dump is empty"));
        }
        for (index, &actual) in self.words.iter().enumerate() {
            let want = expected(index);
            if actual != want {
                return Err(self.mismatch(index, want, actual));
            }
        }
        Ok(())
    }

    pub fn expect_word(&self, index: usize, want: u32) -> Result<(), TestError> {
        match self.words.get(index) {
            Some(&actual) if actual == want => Ok(()),
            Some(&actual) => Err(self.mismatch(index, want, actual)),
            None => Err(TestError::assertion(format!(
                "dump has {} words, no word {index}",
                self.words.len()
            ))),
        }
    }

    fn mismatch(&self, index: usize, want: u32, actual: u32) -> TestError {
        TestError::assertion(format!(
            "mismatch at {:#x} (offset {:#x}): expected {want:#010x}, got {actual:#010x}",
            self.address_of(index),
            index * 4
        ))
    }
}
