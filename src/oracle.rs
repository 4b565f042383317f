//! The labeling side of active learning: whoever decides whether a pair is
//! a match. Usually a human at a console, a closure in tests.

use std::io::{self, BufRead, BufReader, Stdout, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::error::DedupError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    Match,
    NoMatch,
    /// Abstain: the pair is dropped from the pool.
    Skip,
    /// Re-ask the previously answered pair and replace its label.
    Previous,
    /// Stop labeling.
    Finish,
}

impl Answer {
    pub fn parse(input: &str) -> Option<Answer> {
        match input.trim().to_lowercase().as_str() {
            "y" | "1" => Some(Answer::Match),
            "n" | "0" => Some(Answer::NoMatch),
            "s" => Some(Answer::Skip),
            "p" => Some(Answer::Previous),
            "f" => Some(Answer::Finish),
            _ => None,
        }
    }
}

/// What the oracle gets to see for one question.
#[derive(Clone, Copy, Debug)]
pub struct Query<'a> {
    pub fields: &'a [String],
    pub left: &'a [String],
    pub right: &'a [String],
    pub similarities: &'a [f64],
    pub n_labeled: usize,
    pub n_positive: usize,
    pub n_negative: usize,
    /// Current classifier parameters, when a two-class model exists.
    pub parameters: Option<&'a [f64]>,
}

pub trait Oracle {
    fn label(&mut self, query: &Query<'_>) -> Result<Answer, DedupError>;
}

impl<F> Oracle for F
where
    F: FnMut(&Query<'_>) -> Answer,
{
    fn label(&mut self, query: &Query<'_>) -> Result<Answer, DedupError> {
        Ok(self(query))
    }
}

///
/// Interactive oracle reading one answer per line.
///
/// Lines are read on a background thread so a query can time out; a timeout
/// counts as `Skip`, end of input as `Finish`. Anything else than
/// y/n/1/0/p/s/f is rejected and asked again.
///
pub struct ConsoleOracle<W: Write> {
    lines: Receiver<String>,
    out: W,
    timeout: Option<Duration>,
    timed_out: bool,
}

impl ConsoleOracle<Stdout> {
    pub fn stdin(timeout: Option<Duration>) -> Self {
        ConsoleOracle::new(BufReader::new(io::stdin()), io::stdout(), timeout)
    }
}

impl<W: Write> ConsoleOracle<W> {
    pub fn new<R: BufRead + Send + 'static>(input: R, out: W, timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        ConsoleOracle {
            lines: rx,
            out,
            timeout,
            timed_out: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn prompt(&mut self, query: &Query<'_>) -> io::Result<()> {
        writeln!(
            self.out,
            "\nNr. {} ({}+/{}-)",
            query.n_labeled + 1,
            query.n_positive,
            query.n_negative
        )?;
        if let Some(params) = query.parameters {
            writeln!(self.out, "LR parameters: {params:.3?}")?;
        }
        writeln!(self.out, "Is this a match? (y)es, (n)o, (p)revious, (s)kip, (f)inish")?;
        for side in [query.left, query.right] {
            let shown: Vec<String> = query
                .fields
                .iter()
                .zip(side)
                .map(|(field, value)| format!("{field}: {value}"))
                .collect();
            writeln!(self.out, "-> {}", shown.join(" | "))?;
        }
        self.out.flush()
    }

    fn next_line(&self) -> Option<Result<String, RecvTimeoutError>> {
        match self.timeout {
            Some(timeout) => match self.lines.recv_timeout(timeout) {
                Ok(line) => Some(Ok(line)),
                Err(RecvTimeoutError::Disconnected) => None,
                Err(err) => Some(Err(err)),
            },
            None => self.lines.recv().ok().map(Ok),
        }
    }
}

impl<W: Write> Oracle for ConsoleOracle<W> {
    fn label(&mut self, query: &Query<'_>) -> Result<Answer, DedupError> {
        // answers typed after a timeout belong to the old question
        if self.timed_out {
            while self.lines.try_recv().is_ok() {}
            self.timed_out = false;
        }
        self.prompt(query)?;
        loop {
            match self.next_line() {
                None => return Ok(Answer::Finish),
                Some(Err(_)) => {
                    self.timed_out = true;
                    writeln!(self.out, "No answer in time, skipping")?;
                    return Ok(Answer::Skip);
                }
                Some(Ok(line)) => match Answer::parse(&line) {
                    Some(answer) => return Ok(answer),
                    None => {
                        writeln!(self.out, "Wrong input!")?;
                        self.out.flush()?;
                    }
                },
            }
        }
    }
}
