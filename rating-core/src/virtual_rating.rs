//! Virtual ratings: a graph of source ratings wired together by a
//! connections string such as `R2I1=R1D,R1I1=I1,D=R2D`.
//!
//! `R{n}I{k}` is the k-th input of source n, `R{n}D` its output, `I{j}` the j-th
//! input of the virtual rating, and `D` the virtual rating's output.

use std::fmt;

use crate::error::{RatingError, Result};
use crate::rating::Rate;
use crate::source::SourceRating;

/// What feeds one source input. Indices are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPoint {
    /// An input of the virtual rating.
    External(usize),
    /// The output of another source.
    Source(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    SourceInput(usize, usize),
    SourceOutput(usize),
    Input(usize),
    Output,
}

fn parse_index(text: &str, whole: &str) -> Result<usize> {
    match text.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(RatingError::Configuration(format!(
            "bad index in connection term '{}'",
            whole
        ))),
    }
}

fn parse_term(text: &str) -> Result<Term> {
    let upper = text.trim().to_ascii_uppercase();
    if upper == "D" {
        return Ok(Term::Output);
    }
    if let Some(rest) = upper.strip_prefix('I') {
        return Ok(Term::Input(parse_index(rest, text)?));
    }
    if let Some(rest) = upper.strip_prefix('R') {
        if let Some(source) = rest.strip_suffix('D') {
            return Ok(Term::SourceOutput(parse_index(source, text)?));
        }
        if let Some((source, input)) = rest.split_once('I') {
            return Ok(Term::SourceInput(
                parse_index(source, text)?,
                parse_index(input, text)?,
            ));
        }
    }
    Err(RatingError::Configuration(format!(
        "unrecognized connection term '{}'",
        text
    )))
}

/// The parsed, validated wiring of a virtual rating.
#[derive(Debug, Clone, PartialEq)]
pub struct Connections {
    text: String,
    /// Per source, what feeds each of its inputs.
    inputs: Vec<Vec<ConnectionPoint>>,
    /// The source whose output is the rating's output.
    output: usize,
}

impl Connections {
    /// Parse `text` for sources with the given input counts.
    ///
    /// Unconnected source inputs default to the virtual rating's input of the
    /// same position.
    pub fn parse(text: &str, source_input_counts: &[usize], ind_param_count: usize) -> Result<Self> {
        let config = |msg: String| RatingError::Configuration(format!("connections '{}': {}", text, msg));
        let mut inputs: Vec<Vec<Option<ConnectionPoint>>> =
            source_input_counts.iter().map(|&n| vec![None; n]).collect();
        let mut output = None;

        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (left, right) = pair
                .split_once('=')
                .ok_or_else(|| config(format!("'{}' is not a connection", pair)))?;
            let (left, right) = (parse_term(left)?, parse_term(right)?);
            match (left, right) {
                (Term::Output, Term::SourceOutput(n)) | (Term::SourceOutput(n), Term::Output) => {
                    if n >= source_input_counts.len() {
                        return Err(config(format!("no source R{}", n + 1)));
                    }
                    output = Some(n);
                }
                (Term::SourceInput(n, k), other) | (other, Term::SourceInput(n, k)) => {
                    let point = match other {
                        Term::Input(j) if j < ind_param_count => ConnectionPoint::External(j),
                        Term::Input(j) => return Err(config(format!("no input I{}", j + 1))),
                        Term::SourceOutput(m) if m == n => {
                            return Err(config(format!("R{} feeds itself", n + 1)))
                        }
                        Term::SourceOutput(m) if m < source_input_counts.len() => ConnectionPoint::Source(m),
                        Term::SourceOutput(m) => return Err(config(format!("no source R{}", m + 1))),
                        _ => return Err(config(format!("'{}' connects two inputs", pair))),
                    };
                    let slot = inputs
                        .get_mut(n)
                        .and_then(|source| source.get_mut(k))
                        .ok_or_else(|| config(format!("no input R{}I{}", n + 1, k + 1)))?;
                    if slot.is_some() {
                        return Err(config(format!("R{}I{} is connected twice", n + 1, k + 1)));
                    }
                    *slot = Some(point);
                }
                _ => return Err(config(format!("'{}' is not a valid connection", pair))),
            }
        }

        let output = match output {
            Some(n) => n,
            None if source_input_counts.len() == 1 => 0,
            None => return Err(config("no output connection (D=R{n}D)".to_string())),
        };
        let inputs = inputs
            .into_iter()
            .enumerate()
            .map(|(n, source)| {
                source
                    .into_iter()
                    .enumerate()
                    .map(|(k, point)| match point {
                        Some(point) => Ok(point),
                        None if k < ind_param_count => Ok(ConnectionPoint::External(k)),
                        None => Err(config(format!("R{}I{} is not connected", n + 1, k + 1))),
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let connections = Self {
            text: text.trim().to_string(),
            inputs,
            output,
        };
        connections.check_cycles()?;
        Ok(connections)
    }

    fn check_cycles(&self) -> Result<()> {
        // 0 = unvisited, 1 = on the current path, 2 = done
        fn visit(n: usize, inputs: &[Vec<ConnectionPoint>], state: &mut [u8], path: &mut Vec<usize>) -> Option<Vec<usize>> {
            match state[n] {
                1 => {
                    let start = path.iter().position(|&p| p == n).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(n);
                    return Some(cycle);
                }
                2 => return None,
                _ => {}
            }
            state[n] = 1;
            path.push(n);
            for point in &inputs[n] {
                if let ConnectionPoint::Source(m) = point {
                    if let Some(cycle) = visit(*m, inputs, state, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            state[n] = 2;
            None
        }

        let mut state = vec![0u8; self.inputs.len()];
        for n in 0..self.inputs.len() {
            if let Some(cycle) = visit(n, &self.inputs, &mut state, &mut Vec::new()) {
                let names: Vec<String> = cycle.iter().map(|c| format!("R{}", c + 1)).collect();
                return Err(RatingError::Configuration(format!(
                    "connections '{}' contain a cycle: {}",
                    self.text,
                    names.join(" -> ")
                )));
            }
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn output(&self) -> usize {
        self.output
    }

    pub fn source_inputs(&self, source: usize) -> &[ConnectionPoint] {
        &self.inputs[source]
    }
}

impl fmt::Display for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug)]
pub struct VirtualRating {
    connections: Connections,
    sources: Vec<SourceRating>,
    ind_param_count: usize,
}

impl VirtualRating {
    pub fn new(connections: &str, sources: Vec<SourceRating>, ind_param_count: usize) -> Result<Self> {
        if sources.is_empty() {
            return Err(RatingError::Configuration(
                "virtual rating has no source ratings".to_string(),
            ));
        }
        let counts = sources
            .iter()
            .map(SourceRating::ind_param_count)
            .collect::<Result<Vec<_>>>()?;
        let connections = Connections::parse(connections, &counts, ind_param_count)?;
        Ok(Self {
            connections,
            sources,
            ind_param_count,
        })
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn sources(&self) -> &[SourceRating] {
        &self.sources
    }

    pub fn ind_param_count(&self) -> usize {
        self.ind_param_count
    }

    fn evaluate(&self, source: usize, time: i64, inputs: &[f64], memo: &mut [Option<Option<f64>>]) -> Result<Option<f64>> {
        if let Some(value) = memo[source] {
            return Ok(value);
        }
        let mut args = Vec::with_capacity(self.connections.inputs[source].len());
        for point in &self.connections.inputs[source] {
            let arg = match *point {
                ConnectionPoint::External(j) => Some(inputs[j]),
                ConnectionPoint::Source(m) => self.evaluate(m, time, inputs, memo)?,
            };
            match arg {
                Some(v) => args.push(v),
                None => {
                    memo[source] = Some(None);
                    return Ok(None);
                }
            }
        }
        let value = self.sources[source].rate_one(time, &args)?;
        memo[source] = Some(value);
        Ok(value)
    }
}

impl Rate for VirtualRating {
    fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        if inputs.len() != self.ind_param_count {
            return Err(RatingError::Configuration(format!(
                "virtual rating takes {} inputs, got {}",
                self.ind_param_count,
                inputs.len()
            )));
        }
        let mut memo = vec![None; self.sources.len()];
        self.evaluate(self.connections.output, time, inputs, &mut memo)
    }

    /// Walk the chain from the output source back to the external input.
    fn reverse_rate_one(&self, time: i64, output: f64) -> Result<Option<f64>> {
        if self.ind_param_count != 1 {
            return Err(RatingError::Unsupported(
                "reverse rating a virtual rating with more than one input".to_string(),
            ));
        }
        if let Some(source) = self.sources.iter().find(|s| matches!(s, SourceRating::Expression(_))) {
            return Err(RatingError::Unsupported(format!(
                "reverse rating a virtual rating through {}",
                source.describe()
            )));
        }
        let mut source = self.connections.output;
        let mut value = output;
        for _ in 0..self.sources.len() {
            let point = match self.connections.inputs[source].as_slice() {
                [point] => *point,
                _ => {
                    return Err(RatingError::Unsupported(format!(
                        "reverse rating through multi-input source {}",
                        self.sources[source].describe()
                    )))
                }
            };
            let Some(input) = self.sources[source].reverse_rate_one(time, value)? else {
                return Ok(None);
            };
            match point {
                ConnectionPoint::External(_) => return Ok(Some(input)),
                ConnectionPoint::Source(m) => {
                    source = m;
                    value = input;
                }
            }
        }
        Err(RatingError::Configuration(format!(
            "connections '{}' never reach an external input",
            self.connections
        )))
    }
}
