use anyhow::Result;
use ironbeam_groupby::testing::*;
use ironbeam_groupby::*;

fn pets(g: &Graph) -> Result<Relation> {
    Ok(g.table(PETS_COLUMNS, pets_rows())?)
}

#[test]
fn non_key_column_outside_reducer_is_a_scoping_error() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let view = pets.group_by([this("owner")])?;

    let err = view.reduce(Outputs::new().named("a", this("age"))).unwrap_err();
    assert_eq!(err, PlanError::Scoping { expression: pets.col("age").to_string() });
    let msg = err.to_string();
    assert!(msg.contains("add it to the grouping keys"));
    assert!(msg.contains(&format!("count({})", pets.col("age"))));

    // The same column is fine once aggregated.
    view.reduce(Outputs::new().named("a", sum(this("age"))))?;
    Ok(())
}

#[test]
fn scoping_sees_through_arithmetic() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let view = pets.group_by([this("owner")])?;

    let err = view
        .reduce(Outputs::new().named("a", sum(this("age")) + this("age")))
        .unwrap_err();
    assert!(matches!(err, PlanError::Scoping { .. }));
    Ok(())
}

#[test]
fn indexed_lookup_key_is_still_scoped() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let view = pets.group_by([this("owner")])?;

    let err = view
        .reduce(Outputs::new().named("p", pets.ix(pointer_from([this("age")])).col("pet")))
        .unwrap_err();
    assert_eq!(err, PlanError::Scoping { expression: pets.col("age").to_string() });
    Ok(())
}

#[test]
fn failed_reduce_adds_no_relations() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let view = pets.group_by([this("owner")])?;
    let before = g.relation_count()?;

    assert!(view.reduce(Outputs::new().named("a", this("pet"))).is_err());
    assert_eq!(g.relation_count()?, before);
    Ok(())
}

#[test]
fn reducer_over_foreign_universe_is_rejected_until_registered() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let weights = g.table(&["w"], (1..=4i64).map(|w| vec![w.into()]).collect())?;
    let view = pets.group_by([this("owner")])?;
    let outputs = || Outputs::new().column(this("owner")).named("w", sum(weights.col("w")));

    let err = view.reduce(outputs()).unwrap_err();
    assert_eq!(err, PlanError::UniverseMismatch { expression: weights.col("w").to_string() });
    assert!(err.to_string().contains("with_universe_of"));

    g.register_universes_equal(&pets, &weights)?;
    let out = view.reduce(outputs())?;
    assert_rows_unordered_equal(
        &row_values(&out.collect_seq()?),
        &[vec!["Alice".into(), 4.into()], vec!["Bob".into(), 6.into()]],
    );
    Ok(())
}

#[test]
fn with_universe_of_unlocks_reducer_arguments() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let weights = g.table(&["w"], (1..=4i64).map(|w| vec![w.into()]).collect())?;
    let aligned = weights.with_universe_of(&pets)?;

    let out = pets
        .group_by([this("pet")])?
        .reduce(Outputs::new().column(this("pet")).named("w", max(aligned.col("w"))))?;
    assert_rows_unordered_equal(
        &row_values(&out.collect_seq()?),
        &[vec!["dog".into(), 4.into()], vec!["cat".into(), 3.into()]],
    );
    Ok(())
}

#[test]
fn filtered_relation_gets_its_own_universe() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;
    let dogs = pets.filter(this("pet").equals(lit("dog")))?;
    assert!(!g.universes_equal(&pets, &dogs)?);

    let err = dogs
        .group_by([this("owner")])?
        .reduce(Outputs::new().named("n", sum(pets.col("age"))))
        .unwrap_err();
    assert!(matches!(err, PlanError::UniverseMismatch { .. }));
    Ok(())
}

#[test]
fn duplicate_output_names_are_rejected() -> Result<()> {
    let g = Graph::default();
    let view = pets(&g)?.group_by([this("owner")])?;

    let err = view
        .reduce(Outputs::new().column(this("owner")).named("owner", count()))
        .unwrap_err();
    assert_eq!(err, PlanError::DuplicateOutputName { name: "owner".to_string() });
    Ok(())
}

#[test]
fn positional_output_must_be_a_column() -> Result<()> {
    let g = Graph::default();
    let view = pets(&g)?.group_by([this("owner")])?;

    let err = view.reduce(Outputs::new().column(count())).unwrap_err();
    assert!(matches!(err, PlanError::PositionalNotColumn { .. }));
    Ok(())
}

#[test]
fn nested_reducers_are_rejected() -> Result<()> {
    let g = Graph::default();
    let view = pets(&g)?.group_by([this("owner")])?;

    let err = view
        .reduce(Outputs::new().named("x", sum(max(this("age")))))
        .unwrap_err();
    assert!(matches!(err, PlanError::NestedReducer { .. }));
    Ok(())
}

#[test]
fn malformed_grouping_keys() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;

    assert!(matches!(
        pets.group_by([this("weight")]).unwrap_err(),
        PlanError::UnknownColumn { column, .. } if column == "weight"
    ));
    assert!(matches!(
        pets.group_by([sum(this("age"))]).unwrap_err(),
        PlanError::ReducerInGroupingKey { .. }
    ));
    assert!(matches!(
        pets.group_by([left("owner")]).unwrap_err(),
        PlanError::UnresolvedPlaceholder { .. }
    ));
    assert!(matches!(
        pets.group_by([this("age") + lit(1)]).unwrap_err(),
        PlanError::InvalidGrouping { .. }
    ));
    assert_eq!(g.cached_view_count()?, 0);
    Ok(())
}

#[test]
fn identity_grouping_rules() -> Result<()> {
    let g = Graph::default();
    let items = g.table(&["parent", "v"], vec![vec![Pointer(1).into(), 1.into()]])?;

    let with_key =
        items.group_by_with([this("parent")], GroupOptions::new().identity(this("parent")))?;
    assert!(with_key.ptr_eq(&items.group_by_id(this("parent"))?));

    let other_key = items.group_by_with([this("v")], GroupOptions::new().identity(this("parent")));
    assert!(matches!(other_key.unwrap_err(), PlanError::InvalidGrouping { .. }));

    let two_keys = items
        .group_by_with([this("v"), this("parent")], GroupOptions::new().identity(this("parent")));
    assert!(matches!(two_keys.unwrap_err(), PlanError::InvalidGrouping { .. }));

    let no_key = items.group_by_with(Vec::<Expr>::new(), GroupOptions::new().set_identity(true));
    assert!(matches!(no_key.unwrap_err(), PlanError::InvalidGrouping { .. }));
    Ok(())
}

#[test]
fn reducers_are_rejected_in_select() -> Result<()> {
    let g = Graph::default();
    let pets = pets(&g)?;

    let err = pets.select(Outputs::new().named("s", sum(this("age")))).unwrap_err();
    assert!(matches!(err, PlanError::ReducerOutsideReduce { .. }));
    Ok(())
}
