//! Prometheus text exposition format.
//!
//! Renders space snapshots into the Prometheus text exposition format for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use fleetgrid_state::{MachinetypeSnapshot, SpaceSnapshot};

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

fn space_gauge(out: &mut String, name: &str, help: &str, snapshots: &[SpaceSnapshot], value: impl Fn(&SpaceSnapshot) -> String) {
    header(out, name, help);
    for s in snapshots {
        let _ = writeln!(out, "{name}{{space=\"{}\"}} {}", s.space, value(s));
    }
}

fn machinetype_gauge(
    out: &mut String,
    name: &str,
    help: &str,
    snapshots: &[SpaceSnapshot],
    value: impl Fn(&MachinetypeSnapshot) -> String,
) {
    header(out, name, help);
    for s in snapshots {
        for mt in &s.machinetypes {
            let _ = writeln!(
                out,
                "{name}{{space=\"{}\",machinetype=\"{}\"}} {}",
                s.space,
                mt.name,
                value(mt)
            );
        }
    }
}

/// Render the latest snapshot of each space into Prometheus text format.
///
/// Space-level gauges carry a `space` label; machinetype-level gauges carry
/// `space` and `machinetype`. A space without a known processor limit has no
/// `fleetgrid_space_processors_limit` sample.
pub fn render_prometheus(snapshots: &[SpaceSnapshot]) -> String {
    let mut out = String::new();

    header(
        &mut out,
        "fleetgrid_space_processors_limit",
        "Processor limit of the space.",
    );
    for s in snapshots {
        if let Some(limit) = s.processors_limit {
            let _ = writeln!(out, "fleetgrid_space_processors_limit{{space=\"{}\"}} {limit}", s.space);
        }
    }

    space_gauge(&mut out, "fleetgrid_space_machines", "Machines in the space, foreign ones included.", snapshots, |s| {
        s.total_machines.to_string()
    });
    space_gauge(&mut out, "fleetgrid_space_processors", "Processors in the space, foreign ones included.", snapshots, |s| {
        s.total_processors.to_string()
    });
    space_gauge(&mut out, "fleetgrid_space_starting_processors", "Processors of starting machines.", snapshots, |s| {
        s.starting_processors.to_string()
    });
    space_gauge(&mut out, "fleetgrid_space_running_machines", "Running machines.", snapshots, |s| {
        s.running_machines.to_string()
    });
    space_gauge(&mut out, "fleetgrid_space_running_processors", "Processors of running machines.", snapshots, |s| {
        s.running_processors.to_string()
    });
    space_gauge(&mut out, "fleetgrid_space_running_hs06", "Benchmark weight of running machines.", snapshots, |s| {
        format!("{:.2}", s.running_hs06)
    });

    machinetype_gauge(&mut out, "fleetgrid_machinetype_target_share", "Configured target share.", snapshots, |m| {
        format!("{:.4}", m.target_share)
    });
    machinetype_gauge(&mut out, "fleetgrid_machinetype_processors", "Processors of the machinetype.", snapshots, |m| {
        m.total_processors.to_string()
    });
    machinetype_gauge(
        &mut out,
        "fleetgrid_machinetype_starting_processors",
        "Processors of starting machines.",
        snapshots,
        |m| m.starting_processors.to_string(),
    );
    machinetype_gauge(
        &mut out,
        "fleetgrid_machinetype_running_processors",
        "Processors of running machines.",
        snapshots,
        |m| m.running_processors.to_string(),
    );
    machinetype_gauge(
        &mut out,
        "fleetgrid_machinetype_weighted_machines",
        "Running and starting weight divided by target share.",
        snapshots,
        |m| format!("{:.2}", m.weighted_machines),
    );
    machinetype_gauge(
        &mut out,
        "fleetgrid_machinetype_not_passed_fizzle",
        "Machines still inside their fizzle window.",
        snapshots,
        |m| m.not_passed_fizzle.to_string(),
    );
    machinetype_gauge(
        &mut out,
        "fleetgrid_machinetype_last_abort_time",
        "Unix time of the most recent abort.",
        snapshots,
        |m| m.last_abort_time.to_string(),
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_machinetype(name: &str) -> MachinetypeSnapshot {
        MachinetypeSnapshot {
            name: name.to_string(),
            target_share: 0.75,
            total_machines: 6,
            total_processors: 12,
            starting_processors: 2,
            running_machines: 5,
            running_processors: 10,
            running_hs06: 10.0,
            weighted_machines: 16.0,
            not_passed_fizzle: 1,
            last_abort_time: 1500,
        }
    }

    fn test_snapshot(space: &str, limit: Option<u32>) -> SpaceSnapshot {
        SpaceSnapshot {
            space: space.to_string(),
            epoch: 2000,
            processors_limit: limit,
            total_machines: 7,
            total_processors: 16,
            starting_processors: 2,
            running_machines: 6,
            running_processors: 14,
            running_hs06: 14.0,
            machinetypes: vec![test_machinetype("atlas")],
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Should still have type declarations.
        assert!(output.contains("# HELP fleetgrid_space_processors "));
        assert!(output.contains("# TYPE fleetgrid_machinetype_weighted_machines gauge"));
    }

    #[test]
    fn render_single_space() {
        let output = render_prometheus(&[test_snapshot("cloud", Some(100))]);

        assert!(output.contains("fleetgrid_space_processors_limit{space=\"cloud\"} 100"));
        assert!(output.contains("fleetgrid_space_processors{space=\"cloud\"} 16"));
        assert!(output.contains("fleetgrid_space_running_hs06{space=\"cloud\"} 14.00"));
        assert!(output.contains(
            "fleetgrid_machinetype_target_share{space=\"cloud\",machinetype=\"atlas\"} 0.7500"
        ));
        assert!(output.contains(
            "fleetgrid_machinetype_weighted_machines{space=\"cloud\",machinetype=\"atlas\"} 16.00"
        ));
        assert!(output.contains(
            "fleetgrid_machinetype_last_abort_time{space=\"cloud\",machinetype=\"atlas\"} 1500"
        ));
    }

    #[test]
    fn unknown_limit_has_no_sample() {
        let output = render_prometheus(&[test_snapshot("cloud", None)]);
        assert!(!output.contains("fleetgrid_space_processors_limit{"));
        assert!(output.contains("fleetgrid_space_machines{space=\"cloud\"} 7"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&[test_snapshot("a", Some(10)), test_snapshot("b", None)]);

        // Every non-empty, non-comment line should match: metric_name{labels} value
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains('}'),
                "line should have labels: {line}"
            );
            assert_eq!(line.split(' ').count(), 2, "line should have one value: {line}");
        }
    }
}
