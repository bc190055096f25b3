//! CSV batch rating.
//!
//! Input rows are `time,value...` with no header; `#` starts a comment line.
//! Forward rating takes one value per independent parameter, reverse rating
//! takes the single dependent value. Output rows are `time,result` with an
//! empty result where the set's policy leaves the value undefined.

use std::fs::File;
use std::io::{self, Read, Write};

use log::info;
use rating_core::RatingSet;
use rating_utils::times::{format_millis, parse_time};

use crate::SetArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

struct Batch {
    times: Vec<i64>,
    values: Vec<Vec<f64>>,
}

fn read_batch<R: Read>(input: R, width: usize) -> anyhow::Result<Batch> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(input);
    let mut batch = Batch {
        times: Vec::new(),
        values: Vec::new(),
    };
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let time = record.get(0).unwrap_or("");
        let values = record
            .iter()
            .skip(1)
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("row {}: {}", line + 1, e))?;
        if values.len() != width {
            anyhow::bail!("row {}: expected {} values, found {}", line + 1, width, values.len());
        }
        batch.times.push(parse_time(time).map_err(|e| anyhow::anyhow!("row {}: {}", line + 1, e))?);
        batch.values.push(values);
    }
    Ok(batch)
}

/// Rate every row of `input` and write `time,result` rows to `output`.
///
/// Returns the number of rows rated.
pub fn rate_csv<R: Read, W: Write>(set: &RatingSet, direction: Direction, input: R, output: W) -> anyhow::Result<usize> {
    let width = match direction {
        Direction::Forward => set.spec()?.ind_param_count(),
        Direction::Reverse => 1,
    };
    let batch = read_batch(input, width)?;
    let results = match direction {
        Direction::Forward => set.rate(&batch.times, &batch.values)?,
        Direction::Reverse => {
            let outputs: Vec<f64> = batch.values.iter().map(|v| v[0]).collect();
            set.reverse_rate(&batch.times, &outputs)?
        }
    };
    let mut wtr = csv::Writer::from_writer(output);
    for (time, result) in batch.times.iter().zip(&results) {
        wtr.write_record([format_millis(*time), result.map(|v| v.to_string()).unwrap_or_default()])?;
    }
    wtr.flush()?;
    Ok(results.len())
}

pub fn run_batch(args: &SetArgs, direction: Direction, input: Option<&str>, output: Option<&str>) -> anyhow::Result<()> {
    let set = args.open()?;
    let reader: Box<dyn Read> = match input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin().lock()),
    };
    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let count = rate_csv(&set, direction, reader, writer)?;
    info!("{:?} rated {} rows with {}", direction, count, args.spec);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rating_core::{ConcreteRating, RatingBody, RatingSpec, RatingTable, TableRating};

    const DAY: i64 = 86_400_000;

    /// Y = 2X on day 0, Y = 4X on day 2, nothing outside.
    fn set() -> RatingSet {
        let spec = RatingSpec::new("SWT", "KEYS", "Stage;Flow.Linear", "Production").with_methods(
            rating_core::RatingMethod::Linear,
            rating_core::RatingMethod::Null,
            rating_core::RatingMethod::Null,
        );
        let rating = |date: i64, scale: f64| {
            let table = RatingTable::from_pairs(&[(0.0, 0.0), (100.0, 100.0 * scale)]).unwrap();
            ConcreteRating::for_spec(&spec, date, 0, RatingBody::Table(TableRating::new(table)))
        };
        let set = RatingSet::new(spec.clone());
        set.add_ratings(vec![rating(0, 2.0), rating(2 * DAY, 4.0)]).unwrap();
        set
    }

    fn run(direction: Direction, input: &str) -> anyhow::Result<String> {
        let mut out = Vec::new();
        rate_csv(&set(), direction, input.as_bytes(), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn forward_batch() {
        let out = run(Direction::Forward, "# time,stage\n1970-01-01,10\n1970-01-02,10\n1970-01-05,10\n").unwrap();
        assert_eq!(
            out,
            "1970-01-01 00:00:00,20\n1970-01-02 00:00:00,30\n1970-01-05 00:00:00,\n"
        );
    }

    #[test]
    fn reverse_batch() {
        let out = run(Direction::Reverse, "1970-01-03,40\n1970-01-03,80\n").unwrap();
        assert_eq!(out, "1970-01-03 00:00:00,10\n1970-01-03 00:00:00,20\n");
    }

    #[test]
    fn rejects_wrong_width() {
        assert!(run(Direction::Forward, "1970-01-01,1,2\n").is_err());
        assert!(run(Direction::Reverse, "1970-01-01\n").is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(run(Direction::Forward, "1970-01-01,abc\n").is_err());
        assert!(run(Direction::Forward, "yesterday,1\n").is_err());
    }
}
