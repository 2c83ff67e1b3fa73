use crate::metrics::reader::CoveragePoint;

/// Past this many seconds the chart switches to an hourly time axis.
pub const HOURLY_THRESHOLD_SECS: f64 = 60.0 * 60.0;
/// Keep one sample in this many once the series is on the hourly axis.
pub const HOURLY_STRIDE: usize = 4;

/// Prepare a coverage series for the dashboard chart: `[time, percent]`
/// pairs where time is seconds, or hours once the run is older than an hour.
///
/// Fixed heuristic kept for parity with the chart widget, not a general
/// downsampler.
pub fn display_series(points: &[CoveragePoint]) -> Vec<[f64; 2]> {
    let Some(last) = points.last() else {
        return Vec::new();
    };

    let resampled: Vec<[f64; 2]> = if last.time > HOURLY_THRESHOLD_SECS {
        points
            .iter()
            .step_by(HOURLY_STRIDE)
            .map(|p| [p.time / HOURLY_THRESHOLD_SECS, p.fraction])
            .collect()
    } else {
        points.iter().map(|p| [p.time, p.fraction]).collect()
    };

    // percentages last, after resampling
    resampled
        .into_iter()
        .map(|[time, fraction]| [time, fraction * 100.0])
        .collect()
}
