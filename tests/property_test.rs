//! Property tests for the numeric core

use proptest::prelude::*;
use rusty_deflator::exchange::ExchangeTable;
use rusty_deflator::rebase::rebase;
use rusty_deflator::source::SeriesRow;

fn row(year: i32, entity: &str, value: f64) -> SeriesRow {
    SeriesRow {
        year,
        entity_code: entity.to_string(),
        iso3: Some(entity.to_string()),
        value: Some(value),
    }
}

fn rate_of(table: &ExchangeTable, year: i32, entity: &str) -> f64 {
    table
        .rows
        .iter()
        .find(|r| r.year == year && r.entity_code == entity)
        .and_then(|r| r.value)
        .unwrap()
}

proptest! {
    /// Rebasing preserves ratios between any two years of a series.
    #[test]
    fn rebase_preserves_ratios(values in prop::collection::vec(1.0f64..1000.0, 3..12)) {
        let base_year = 2000 + (values.len() as i32 / 2);
        let series: Vec<SeriesRow> = values
            .iter()
            .enumerate()
            .map(|(i, v)| row(2000 + i as i32, "USA", *v))
            .collect();

        let rebased = rebase(&series, base_year).unwrap();

        let raw_ratio = values[0] / values[values.len() - 1];
        let new_ratio =
            rebased[0].value.unwrap() / rebased[rebased.len() - 1].value.unwrap();
        prop_assert!((raw_ratio - new_ratio).abs() / raw_ratio.abs() < 1e-4);
    }

    /// Rebased base-year values are 100 within tolerance.
    #[test]
    fn rebase_base_year_is_100(base in 0.5f64..500.0, others in prop::collection::vec(0.5f64..500.0, 1..8)) {
        let mut series = vec![row(2022, "USA", base)];
        for (i, v) in others.iter().enumerate() {
            series.push(row(2000 + i as i32, "USA", *v));
        }

        let rebased = rebase(&series, 2022).unwrap();
        let at_base = rebased.iter().find(|r| r.year == 2022).unwrap();
        prop_assert!((at_base.value.unwrap() - 100.0).abs() < 1e-4);
    }

    /// Triangulated cross rates compose: A->C == A->B * B->C within 1%.
    #[test]
    fn triangulation_is_transitive(
        ra in 0.01f64..500.0,
        rb in 0.01f64..500.0,
        rc in 0.01f64..500.0,
    ) {
        let table = ExchangeTable::new(
            "imf",
            "USA",
            vec![
                row(2022, "AAA", ra),
                row(2022, "BBB", rb),
                row(2022, "CCC", rc),
            ],
        );

        let a_to_b = rate_of(&table.bilateral("AAA", "BBB").unwrap(), 2022, "AAA");
        let b_to_c = rate_of(&table.bilateral("BBB", "CCC").unwrap(), 2022, "AAA");
        let a_to_c = rate_of(&table.bilateral("AAA", "CCC").unwrap(), 2022, "AAA");

        prop_assert!((a_to_c - a_to_b * b_to_c).abs() / a_to_c.abs() < 0.01);
    }

    /// Converting an amount there and back returns the original within 1%.
    #[test]
    fn exchange_roundtrip_is_identity(
        amount in 1.0f64..1_000_000.0,
        ra in 0.01f64..500.0,
        rb in 0.01f64..500.0,
    ) {
        let table = ExchangeTable::new(
            "imf",
            "USA",
            vec![row(2022, "AAA", ra), row(2022, "BBB", rb)],
        );

        let there = rate_of(&table.bilateral("AAA", "BBB").unwrap(), 2022, "AAA");
        let back = rate_of(&table.bilateral("BBB", "AAA").unwrap(), 2022, "AAA");

        let roundtripped = amount * there * back;
        prop_assert!((roundtripped - amount).abs() / amount < 0.01);
    }
}
