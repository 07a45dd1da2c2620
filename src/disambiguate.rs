//! Resolving inputs that match more than one platform.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tracing::debug;

use crate::error::TicketError;
use crate::platform::Platform;

/// Invalid answers tolerated before the prompt gives up.
const MAX_ATTEMPTS: usize = 3;

/// Picks one platform out of several candidates for an input.
#[async_trait]
pub trait Disambiguator: Send + Sync {
  /// `context` is the raw user input. Declining to choose returns
  /// `TicketError::Ambiguous`.
  async fn choose(&self, candidates: &[Platform], context: &str) -> Result<Platform, TicketError>;
}

fn cancelled(candidates: &[Platform], context: &str) -> TicketError {
  TicketError::Ambiguous {
    input: context.to_string(),
    candidates: candidates.to_vec(),
  }
}

/// Numbered menu on stderr, answer read from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptDisambiguator;

#[async_trait]
impl Disambiguator for PromptDisambiguator {
  async fn choose(&self, candidates: &[Platform], context: &str) -> Result<Platform, TicketError> {
    let owned = candidates.to_vec();
    let input = context.to_string();
    let choice = tokio::task::spawn_blocking(move || {
      let stdin = io::stdin();
      let mut stderr = io::stderr();
      prompt(&mut stdin.lock(), &mut stderr, &owned, &input)
    })
    .await
    .ok()
    .flatten();

    debug!(input = context, ?choice, "Disambiguation answered");
    choice.ok_or_else(|| cancelled(candidates, context))
  }
}

/// Run the menu against arbitrary streams. `None` on EOF, I/O failure or too
/// many invalid answers.
fn prompt<R: BufRead, W: Write>(
  reader: &mut R,
  writer: &mut W,
  candidates: &[Platform],
  context: &str,
) -> Option<Platform> {
  writeln!(writer, "'{}' could belong to several platforms:", context).ok()?;
  for (i, platform) in candidates.iter().enumerate() {
    writeln!(writer, "  {}) {}", i + 1, platform.display_name()).ok()?;
  }

  for _ in 0..MAX_ATTEMPTS {
    write!(writer, "Select a platform [1-{}]: ", candidates.len()).ok()?;
    writer.flush().ok()?;

    let mut line = String::new();
    if reader.read_line(&mut line).ok()? == 0 {
      return None;
    }
    match parse_answer(line.trim(), candidates) {
      Some(platform) => return Some(platform),
      None => {
        writeln!(writer, "Not a valid choice: '{}'", line.trim()).ok()?;
      }
    }
  }
  None
}

/// A 1-based menu index or a platform name that is among the candidates.
fn parse_answer(answer: &str, candidates: &[Platform]) -> Option<Platform> {
  if answer.is_empty() {
    return None;
  }
  if let Ok(n) = answer.parse::<usize>() {
    return n.checked_sub(1).and_then(|i| candidates.get(i)).copied();
  }
  answer
    .parse::<Platform>()
    .ok()
    .filter(|p| candidates.contains(p))
}

/// Always picks the configured platform when it is a candidate.
#[derive(Debug, Clone, Copy)]
pub struct FixedDisambiguator(pub Platform);

#[async_trait]
impl Disambiguator for FixedDisambiguator {
  async fn choose(&self, candidates: &[Platform], context: &str) -> Result<Platform, TicketError> {
    if candidates.contains(&self.0) {
      Ok(self.0)
    } else {
      Err(cancelled(candidates, context))
    }
  }
}

/// Non-interactive mode: every ambiguity is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefuseDisambiguator;

#[async_trait]
impl Disambiguator for RefuseDisambiguator {
  async fn choose(&self, candidates: &[Platform], context: &str) -> Result<Platform, TicketError> {
    Err(cancelled(candidates, context))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  const BOTH: &[Platform] = &[Platform::Jira, Platform::Linear];

  fn run(answers: &str) -> (Option<Platform>, String) {
    let mut reader = Cursor::new(answers.as_bytes().to_vec());
    let mut out = Vec::new();
    let choice = prompt(&mut reader, &mut out, BOTH, "PROJ-123");
    (choice, String::from_utf8(out).unwrap())
  }

  #[test]
  fn test_prompt_by_number_and_name() {
    let (choice, shown) = run("2\n");
    assert_eq!(choice, Some(Platform::Linear));
    assert!(shown.contains("1) Jira"));
    assert!(shown.contains("2) Linear"));

    assert_eq!(run("jira\n").0, Some(Platform::Jira));
  }

  #[test]
  fn test_prompt_retries_then_gives_up() {
    assert_eq!(run("7\ngithub\n1\n").0, Some(Platform::Jira));
    assert_eq!(run("x\ny\nz\n1\n").0, None);
    assert_eq!(run("").0, None);
  }

  #[tokio::test]
  async fn test_fixed_and_refuse() {
    assert_eq!(
      FixedDisambiguator(Platform::Linear).choose(BOTH, "PROJ-1").await.unwrap(),
      Platform::Linear
    );
    assert!(matches!(
      FixedDisambiguator(Platform::Github).choose(BOTH, "PROJ-1").await,
      Err(TicketError::Ambiguous { .. })
    ));
    match RefuseDisambiguator.choose(BOTH, "PROJ-1").await {
      Err(TicketError::Ambiguous { input, candidates }) => {
        assert_eq!(input, "PROJ-1");
        assert_eq!(candidates, BOTH);
      }
      other => panic!("unexpected: {other:?}"),
    }
  }
}
