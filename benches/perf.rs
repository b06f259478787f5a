use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use liga_forecast::assemble::{AssembleInputs, assemble};
use liga_forecast::frame::{Frame, JoinType};
use liga_forecast::normalize::{STAT_COLUMNS, normalize_matches, normalize_statistics};
use liga_forecast::pivot::{INJURIES, LINEUPS, pivot};
use liga_forecast::window::{self, Side};

const MATCHES: usize = 2_000;
const TEAMS: i64 = 40;

fn lineup_rows() -> Frame {
    let mut csv = String::from("fixture_id,id_jugador_titular\n");
    for fixture in 0..MATCHES {
        for slot in 0..22 {
            let player = (fixture * 7 + slot * 131) % 3_000;
            csv.push_str(&format!("{fixture},{player}.0\n"));
        }
    }
    Frame::from_csv_reader(csv.as_bytes()).expect("valid lineup csv")
}

fn match_rows() -> Frame {
    let mut csv = String::from(
        "fixture_id,fecha_timestamp,id_equipo_local,id_equipo_visitante,arbitro,estadio,season,\
         goles_local,goles_visitante,goles_descanso_local,goles_descanso_visitante\n",
    );
    for fixture in 0..MATCHES as i64 {
        let home = fixture % TEAMS;
        let away = (fixture * 7 + 3) % TEAMS;
        let away = if away == home { (away + 1) % TEAMS } else { away };
        csv.push_str(&format!(
            "{fixture},{},{home},{away},Ref {},Stadium {home},2020,{},{},0,0\n",
            1_600_000_000 + fixture * 3_600,
            fixture % 17,
            fixture % 4,
            (fixture / 3) % 3
        ));
    }
    Frame::from_csv_reader(csv.as_bytes()).expect("valid match csv")
}

fn stat_rows() -> Frame {
    let mut csv = String::from("fixture_id,");
    csv.push_str(&STAT_COLUMNS.join(","));
    csv.push('\n');
    for fixture in 0..MATCHES {
        csv.push_str(&fixture.to_string());
        for (i, name) in STAT_COLUMNS.iter().enumerate() {
            if name.starts_with("ball_possession") {
                csv.push_str(if i % 2 == 0 { ",55%" } else { ",45%" });
            } else {
                csv.push_str(&format!(",{}", (fixture + i) % 11));
            }
        }
        csv.push('\n');
    }
    Frame::from_csv_reader(csv.as_bytes()).expect("valid statistics csv")
}

fn odds_rows(matches: &Frame) -> Frame {
    let mut csv = String::from("HomeTeam,AwayTeam,odd_1,odd_x,odd_2,season\n");
    let home = matches.i64_values("id_equipo_local").unwrap();
    let away = matches.i64_values("id_equipo_visitante").unwrap();
    let mut seen = std::collections::HashSet::new();
    for row in 0..matches.n_rows() {
        let (Some(h), Some(a)) = (home[row], away[row]) else {
            continue;
        };
        if seen.insert((h, a)) {
            csv.push_str(&format!("{h},{a},2.1,3.2,3.4,2020\n"));
        }
    }
    Frame::from_csv_reader(csv.as_bytes()).expect("valid odds csv")
}

fn bench_lineup_pivot(c: &mut Criterion) {
    let raw = lineup_rows();
    c.bench_function("lineup_pivot", |b| {
        b.iter(|| {
            let (frame, report) = pivot(black_box(&raw), &LINEUPS).unwrap();
            black_box((frame.n_cols(), report.matches));
        })
    });
}

fn bench_assemble(c: &mut Criterion) {
    let matches = normalize_matches(&match_rows()).unwrap();
    let (statistics, _) = normalize_statistics(&stat_rows()).unwrap();
    let (lineups, _) = pivot(&lineup_rows(), &LINEUPS).unwrap();
    let raw_injuries = Frame::from_csv_reader("fixture_id,id_lesionado\n1,58\n".as_bytes()).unwrap();
    let (injuries, _) = pivot(&raw_injuries, &INJURIES).unwrap();
    let odds = odds_rows(&matches);

    c.bench_function("assemble_feature_table", |b| {
        b.iter(|| {
            let (table, _) = assemble(AssembleInputs {
                matches: black_box(&matches),
                statistics: &statistics,
                injuries: &injuries,
                lineups: &lineups,
                odds: &odds,
            })
            .unwrap();
            black_box(table.n_rows());
        })
    });
}

fn bench_derived_series(c: &mut Criterion) {
    let matches = normalize_matches(&match_rows()).unwrap();
    let (statistics, _) = normalize_statistics(&stat_rows()).unwrap();
    let joined = matches
        .join(
            &statistics,
            &["fixture_id"],
            &["fixture_id"],
            JoinType::Left,
        )
        .unwrap();
    c.bench_function("derived_shots_to_score", |b| {
        b.iter(|| {
            let series = window::derived_series(black_box(&joined), Side::Home).unwrap();
            black_box(series.len());
        })
    });
}

criterion_group!(
    benches,
    bench_lineup_pivot,
    bench_assemble,
    bench_derived_series
);
criterion_main!(benches);
