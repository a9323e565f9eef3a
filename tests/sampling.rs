use stamp_sampler::{
    Column, RunInfo, Sampler, SamplerSettings, StampConfig, TimeSource, columns,
    events::SyntheticResolver, formats::Csv, registers::SyntheticRegisters, workload,
};
use std::{cell::Cell, io};

fn counting_clock() -> u64 {
    thread_local!(static NOW: Cell<u64> = const { Cell::new(0) });
    NOW.with(|n| {
        n.set(n.get() + 1);
        n.get()
    })
}

fn sampler(resolver: SyntheticResolver, cols: Vec<Column>) -> Sampler {
    let config = StampConfig::new(
        Box::new(resolver),
        Box::new(SyntheticRegisters::new()),
        TimeSource::with_reader(counting_clock, 1.0),
    );
    let settings = SamplerSettings {
        test_cycles: 10_000,
        period_cycles: 10_000,
        resolution_cycles: 1_000,
        payload_cycles: None,
        warmup_cycles: 0,
        repeats: 1,
        no_warm: false,
    };
    let info = RunInfo {
        elements: 10,
        iterations: 100,
    };
    Sampler::new(
        config,
        cols,
        settings,
        info,
        Box::new(Csv::new(Box::new(io::sink()))),
    )
    .unwrap()
}

#[test]
fn one_period_of_samples() {
    let mut s = sampler(SyntheticResolver::new(1000), columns::by_list("INSTRU").unwrap());
    let reports = s.measure(workload::by_name("dummy").unwrap());
    assert_eq!(reports.len(), 1);
    let rows = &reports[0].rows;
    assert_eq!(rows.iter().filter(|r| r.period == 0).count(), 10);
    assert_eq!(rows.len(), 12);
    for r in rows {
        assert_eq!(r.values.len(), 1);
        assert_eq!(r.values[0], Ok(1.0));
        assert_eq!(r.retries, 0);
    }
    let summary = reports[0].summary(0).unwrap();
    assert_eq!((summary.min, summary.max, summary.median), (1.0, 1.0, 1.0));
}

#[test]
fn failed_event_degrades_only_its_column() {
    let resolver = SyntheticResolver::new(1000).failing(["INST_RETIRED.ANY"]);
    let mut s = sampler(resolver, columns::by_list("INSTRU,Cycles").unwrap());
    let instru: &Column = &s.columns()[0];
    assert_eq!(instru.heading(), "INSTRU");
    let reports = s.run(workload::by_name("sum").unwrap());
    let report = &reports[0];
    assert!(report.column_values(0).all(f64::is_nan));
    assert!(report.summary(0).is_none());
    // 1000 cycles between samples, normalized by 10 elements and 100 iterations
    assert!(report.column_values(1).all(|v| v == 1.0));
}

#[test]
fn post_output_columns_cover_the_repeat() {
    let cols = vec![
        *columns::by_name("INSTRU").unwrap(),
        columns::by_name("Cycles").unwrap().post_output(),
    ];
    let mut s = sampler(SyntheticResolver::new(1000), cols);
    let reports = s.measure(workload::by_name("dummy").unwrap());
    let report = &reports[0];
    assert_eq!(report.columns.len(), 1);
    assert_eq!(report.rows[0].values.len(), 1);
    let (col, value) = &report.post[0];
    assert_eq!(col.heading(), "Cycles");
    // twelve samples of 1000 cycles, normalized by 10 elements and 100 iterations
    assert_eq!(*value, Ok(12.0));
}
