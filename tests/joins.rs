use anyhow::Result;
use ironbeam_groupby::testing::*;
use ironbeam_groupby::*;

fn owners(g: &Graph) -> Result<(Relation, Relation)> {
    let t1 = g.table(OWNERS_LEFT_COLUMNS, owners_left_rows())?;
    let t2 = g.table(OWNERS_RIGHT_COLUMNS, owners_right_rows())?;
    Ok((t1, t2))
}

#[test]
fn join_columns_merge_equi_joined_names_and_rename_clashes() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;

    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;
    assert_eq!(
        j.relation().column_names()?,
        vec!["left_age", "owner", "left_pet", "right_age", "right_pet", "size"]
    );
    assert_eq!(j.left(), t1.id());
    assert_eq!(j.right(), t2.id());
    assert_eq!(j.substitute(&t2.col("pet"))?, j.relation().col("right_pet"));
    assert_eq!(j.substitute(&left("owner"))?, j.relation().col("owner"));
    assert_eq!(j.substitute(&t2.col("owner"))?, j.relation().col("owner"));
    assert!(!g.universes_equal(j.relation(), &t1)?);
    Ok(())
}

#[test]
fn join_produces_matching_pairs() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;

    let j = t1.join(&t2, [(t1.col("owner"), t2.col("owner"))])?;
    let out = j.select(
        Outputs::new()
            .column(left("owner"))
            .named("l", left("pet"))
            .named("r", right("pet")),
    )?;
    assert_rows_unordered_equal(
        &row_values(&out.collect_seq()?),
        &[
            vec!["Alice".into(), 1.into(), 3.into()],
            vec!["Alice".into(), 2.into(), 3.into()],
            vec!["Bob".into(), 1.into(), 1.into()],
        ],
    );
    Ok(())
}

#[test]
fn pairs_per_owner_over_a_join() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;

    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;
    let out = group_join(&j, [t1.col("owner")], None)?
        .reduce(Outputs::new().column(t1.col("owner")).named("pairs", count()))?;

    assert_eq!(out.column_names()?, vec!["owner", "pairs"]);
    assert_rows_unordered_equal(
        &row_values(&out.collect_seq()?),
        &[vec!["Alice".into(), 2.into()], vec!["Bob".into(), 1.into()]],
    );
    Ok(())
}

#[test]
fn join_keys_written_against_either_side_share_a_view() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;
    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;

    let a = j.group_by([left("owner")], None)?;
    let b = j.group_by([t2.col("owner")], None)?;
    assert!(a.view().ptr_eq(b.view()));
    assert_eq!(a.view().grouping_keys(), &[j.relation().col("owner")]);
    Ok(())
}

#[test]
fn reducers_over_join_inputs() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;
    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;

    let out = j.group_by([left("owner")], None)?.reduce(
        Outputs::new()
            .column(left("owner"))
            .named("age_sum", sum(t1.col("age") + right("age")))
            .named("sizes", sorted_tuple(t2.col("size"))),
    )?;
    assert_rows_unordered_equal(
        &row_values(&out.collect_seq()?),
        &[
            vec!["Alice".into(), 38.into(), Value::Tuple(vec!["M".into(), "M".into()])],
            vec!["Bob".into(), 18.into(), Value::Tuple(vec!["L".into()])],
        ],
    );
    Ok(())
}

#[test]
fn non_key_join_column_is_a_scoping_error() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;
    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;

    let err = j
        .group_by([left("owner")], None)?
        .reduce(Outputs::new().named("size", right("size")))
        .unwrap_err();
    assert_eq!(err, PlanError::Scoping { expression: j.relation().col("size").to_string() });
    Ok(())
}

#[test]
fn renamed_columns_are_not_reachable_through_this() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;
    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;

    let err = j.group_by([this("age")], None).unwrap_err();
    assert!(matches!(err, PlanError::UnknownColumn { column, .. } if column == "age"));
    Ok(())
}

#[test]
fn self_join_is_rejected() -> Result<()> {
    let g = Graph::default();
    let (t1, _) = owners(&g)?;

    let err = t1.join(&t1, [(left("owner"), right("owner"))]).unwrap_err();
    assert!(matches!(err, PlanError::InvalidJoin { .. }));
    Ok(())
}

#[test]
fn grouping_a_join_by_identity_keys_results_by_pointer() -> Result<()> {
    let g = Graph::default();
    let (t1, _) = owners(&g)?;
    let homes = g.table(
        &["owner", "home"],
        vec![
            vec!["Alice".into(), Pointer(100).into()],
            vec!["Bob".into(), Pointer(200).into()],
        ],
    )?;
    let j = t1.join(&homes, [(left("owner"), right("owner"))])?;

    let view = j.group_by([], Some(right("home")))?;
    assert_eq!(view.view().grouping_keys(), &[j.relation().col("home")]);
    assert!(view.view().spec().set_identity);
    let out = view.reduce(
        Outputs::new()
            .column(homes.col("home"))
            .named("pets", count())
            .named("age_sum", sum(left("age"))),
    )?;

    let mut rows: Vec<_> = out.collect_seq()?.into_iter().map(|r| (r.key, r.values)).collect();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (Pointer(100), vec![Pointer(100).into(), 2.into(), 18.into()]),
            (Pointer(200), vec![Pointer(200).into(), 1.into(), 9.into()]),
        ]
    );
    Ok(())
}

#[test]
fn join_identity_must_be_a_pointer() -> Result<()> {
    let g = Graph::default();
    let (t1, t2) = owners(&g)?;
    let j = t1.join(&t2, [(left("owner"), right("owner"))])?;

    let out = group_join(&j, Vec::<Expr>::new(), Some(t1.col("pet")))?
        .reduce(Outputs::new().named("pairs", count()))?;
    let err = out.collect_seq().unwrap_err();
    assert!(format!("{err:#}").contains("needs a pointer key"));
    Ok(())
}
