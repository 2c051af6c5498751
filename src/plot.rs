use std::path::Path;

use plotters::prelude::*;

fn component(point: &(f64, f64), axis: usize) -> f64 {
    if axis == 0 {
        point.0
    } else {
        point.1
    }
}

/// Plots actual, measured and estimated positions over time, one panel per
/// axis, into a PNG at `path`
pub fn plot(
    name: &str,
    path: &Path,
    t_history: &[f64],
    actual_state_history: &[(f64, f64)],
    measured_state_history: &[(f64, f64)],
    estimated_state_history: &[(f64, f64)],
) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(&t_start), Some(&t_end)) = (t_history.first(), t_history.last()) else {
        return Ok(());
    };

    let root = BitMapBackend::new(path, (1280, 640)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(name, ("sans-serif", 24))?;

    for (axis, panel) in root.split_evenly((1, 2)).iter().enumerate() {
        let label = if axis == 0 { "x" } else { "y" };
        let (low, high) = actual_state_history
            .iter()
            .chain(measured_state_history)
            .chain(estimated_state_history)
            .map(|p| component(p, axis))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

        let mut chart = ChartBuilder::on(panel)
            .caption(format!("{label} position"), ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(t_start..t_end, (low - 0.5)..(high + 0.5))?;
        chart.configure_mesh().x_desc("time [s]").y_desc(label).draw()?;

        chart
            .draw_series(LineSeries::new(
                t_history
                    .iter()
                    .zip(actual_state_history)
                    .map(|(t, p)| (*t, component(p, axis))),
                &BLACK,
            ))?
            .label("actual")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

        chart
            .draw_series(
                t_history
                    .iter()
                    .zip(measured_state_history)
                    .map(|(t, p)| Circle::new((*t, component(p, axis)), 2, RED.filled())),
            )?
            .label("measured")
            .legend(|(x, y)| Circle::new((x + 10, y), 2, RED.filled()));

        chart
            .draw_series(LineSeries::new(
                t_history
                    .iter()
                    .zip(estimated_state_history)
                    .map(|(t, p)| (*t, component(p, axis))),
                &BLUE,
            ))?
            .label("estimated")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}
