use anyhow::Result;
use ironbeam_groupby::testing::*;
use ironbeam_groupby::*;

fn with_retraction(g: &Graph) -> Result<Relation> {
    Ok(g.table_with_diffs(
        &["k", "v"],
        vec![
            (vec!["a".into(), 1.into()], 1),
            (vec!["a".into(), 2.into()], 1),
            (vec!["b".into(), 5.into()], -1),
        ],
    )?)
}

#[test]
fn retraction_only_groups_are_reported_by_default() -> Result<()> {
    let g = Graph::default();
    let rel = with_retraction(&g)?;

    let out = rel
        .group_by([this("k")])?
        .reduce(Outputs::new().column(this("k")).named("s", sum(this("v"))))?;

    assert_rows_unordered_equal(
        &row_values_with_diffs(&out.collect_seq()?),
        &[(vec!["a".into(), 3.into()], 1), (vec!["b".into(), 5.into()], -1)],
    );
    Ok(())
}

#[test]
fn suppressed_retractions_are_dropped() -> Result<()> {
    let g = Graph::default();
    let rel = with_retraction(&g)?;

    let out = rel
        .group_by_with([this("k")], GroupOptions::new().suppress_retractions(true))?
        .reduce(Outputs::new().column(this("k")).named("s", sum(this("v"))))?;

    let rows = out.collect_seq()?;
    assert_all_rows(&rows, |r| !r.is_retraction());
    assert_rows_unordered_equal(&row_values_with_diffs(&rows), &[(vec!["a".into(), 3.into()], 1)]);
    Ok(())
}

#[test]
fn source_rows_with_the_same_key_and_values_are_consolidated() -> Result<()> {
    let g = Graph::default();
    let rel = g.table_keyed(
        &["x"],
        vec![
            (Pointer(1), vec![4.into()]),
            (Pointer(1), vec![4.into()]),
            (Pointer(2), vec![6.into()]),
        ],
    )?;

    let rows = rel.collect_seq()?;
    assert_rows_unordered_equal(
        &rows.iter().map(|r| (r.key, r.diff)).collect::<Vec<_>>(),
        &[(Pointer(1), 2), (Pointer(2), 1)],
    );
    let out = rel
        .group_by(Vec::<Expr>::new())?
        .reduce(Outputs::new().named("s", sum(this("x"))).named("n", count()))?;
    assert_rows_unordered_equal(&row_values(&out.collect_seq()?), &[vec![14.into(), 3.into()]]);
    Ok(())
}

#[test]
fn source_rows_with_one_key_and_different_values_are_rejected() -> Result<()> {
    let g = Graph::default();
    let before = g.relation_count()?;

    let err = g
        .table_keyed(&["x"], vec![(Pointer(1), vec![4.into()]), (Pointer(1), vec![5.into()])])
        .unwrap_err();
    assert!(matches!(err, PlanError::MalformedRows { .. }));
    assert!(err.to_string().contains("two different value lists"));
    assert_eq!(g.relation_count()?, before);
    Ok(())
}

#[test]
fn sequential_and_parallel_runs_agree() -> Result<()> {
    let g = Graph::default();
    let sales = g.table(SALES_COLUMNS, sales_rows())?;

    let out = sales.group_by([this("shop")])?.reduce(
        Outputs::new()
            .column(this("shop"))
            .named("revenue", sum(this("price") * this("qty")))
            .named("mean_price", avg(this("price")))
            .named("cheapest", min(this("price")))
            .named("lines", count()),
    )?;

    let seq = out.collect_seq()?;
    let par = out.collect_par(Some(2), Some(3))?;
    assert_rows_unordered_equal(&seq, &par);
    assert_rows_unordered_equal(
        &row_values(&seq),
        &[
            vec!["north".into(), 11.0.into(), 3.5.into(), 2.0.into(), 2.into()],
            vec!["south".into(), 25.0.into(), 5.5.into(), 1.5.into(), 3.into()],
        ],
    );
    Ok(())
}

#[test]
fn runner_with_explicit_mode() -> Result<()> {
    let g = Graph::default();
    let pets = g.table(PETS_COLUMNS, pets_rows())?;
    let out = pets
        .group_by([this("owner")])?
        .reduce(Outputs::new().column(this("owner")).named("n", count()))?;

    let runner = Runner { mode: ExecMode::Sequential, ..Runner::default() };
    assert_rows_unordered_equal(
        &row_values(&runner.run_collect(&out)?),
        &[vec!["Alice".into(), 2.into()], vec!["Bob".into(), 2.into()]],
    );
    Ok(())
}

#[test]
fn mismatched_with_universe_of_fails_at_run_time() -> Result<()> {
    let g = Graph::default();
    let pets = g.table(PETS_COLUMNS, pets_rows())?;
    let short = g.table(&["w"], vec![vec![1.into()]])?;

    let claimed = short.with_universe_of(&pets)?;
    let err = claimed.collect_seq().unwrap_err();
    assert!(format!("{err:#}").contains("key sets"));
    Ok(())
}

#[test]
fn filter_then_group() -> Result<()> {
    let g = Graph::default();
    let pets = g.table(PETS_COLUMNS, pets_rows())?;

    let dogs = pets.filter(this("pet").equals(lit("dog")).and(this("age").gt(lit(7))))?;
    let out = dogs
        .group_by([this("owner")])?
        .reduce(Outputs::new().column(this("owner")).named("ages", sorted_tuple(this("age"))))?;

    assert_rows_unordered_equal(
        &row_values(&out.collect_seq()?),
        &[
            vec!["Alice".into(), Value::Tuple(vec![10.into()])],
            vec!["Bob".into(), Value::Tuple(vec![9.into()])],
        ],
    );
    Ok(())
}
