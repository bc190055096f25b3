//! Read-only commands on one rating set.

use log::info;
use rating_core::RatingSet;
use rating_utils::times::{format_millis, parse_time};

use crate::SetArgs;

/// `effective_date,active,loaded` rows, oldest first.
pub fn dates_csv(set: &RatingSet) -> anyhow::Result<String> {
    let active = set.active_effective_dates()?;
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["effective_date", "active", "loaded"])?;
    for date in set.effective_dates()? {
        let loaded = set.is_loaded(date)?.unwrap_or(false);
        wtr.write_record([
            format_millis(date),
            active.contains(&date).to_string(),
            loaded.to_string(),
        ])?;
    }
    Ok(String::from_utf8(wtr.into_inner()?)?)
}

/// `parameter,min,max` rows for the rating in effect at `at`.
pub fn extents_csv(set: &RatingSet, at: Option<i64>) -> anyhow::Result<String> {
    let spec = set.spec()?;
    let extents = set.rating_extents(at)?;
    let mut names: Vec<String> = spec.ind_parameters().iter().map(|s| s.to_string()).collect();
    names.extend(spec.dep_parameter().map(str::to_string));
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["parameter", "min", "max"])?;
    for (i, [min, max]) in extents.iter().enumerate() {
        let name = names.get(i).cloned().unwrap_or_else(|| format!("param{}", i + 1));
        wtr.write_record([name, min.to_string(), max.to_string()])?;
    }
    Ok(String::from_utf8(wtr.into_inner()?)?)
}

pub fn run_dates(args: &SetArgs) -> anyhow::Result<()> {
    let set = args.open()?;
    print!("{}", dates_csv(&set)?);
    info!("{} ratings in {}", set.rating_count()?, args.spec);
    Ok(())
}

pub fn run_extents(args: &SetArgs, at: Option<&str>) -> anyhow::Result<()> {
    let set = args.open()?;
    let at = at.map(parse_time).transpose()?;
    print!("{}", extents_csv(&set, at)?);
    Ok(())
}
