use ndgrad::ops::Arity;
use ndgrad::registry::{self, OpMetadata};
use ndgrad::{Error, OpFamily};
use std::collections::HashSet;

#[test]
fn test_names_are_unique() {
    let mut seen = HashSet::new();
    for def in registry::all() {
        assert!(seen.insert(def.name), "duplicate op name {}", def.name);
    }
    assert!(seen.len() >= 80);
}

#[test]
fn test_numbers_are_unique_per_family() {
    let mut seen = HashSet::new();
    for def in registry::all() {
        assert!(
            seen.insert((def.family(), def.num)),
            "duplicate number {} in {:?}",
            def.num,
            def.family()
        );
    }
}

#[test]
fn test_lookup_by_name_and_number() -> Result<(), Error> {
    let relu = registry::lookup("relu")?;
    assert_eq!(relu.family(), OpFamily::Transform);
    assert_eq!(registry::lookup_num(OpFamily::Transform, relu.num)?.name, "relu");

    assert_eq!(registry::lookup_num(OpFamily::Accumulation, 1)?.name, "sum");
    assert_eq!(registry::lookup_num(OpFamily::Scalar, 0)?.name, "add_scalar");
    assert_eq!(registry::lookup_num(OpFamily::IndexAccumulation, 0)?.name, "imax");
    assert_eq!(registry::lookup_num(OpFamily::Custom, 0)?.name, "mmul");
    assert!(matches!(
        registry::lookup_num(OpFamily::Scalar, 999),
        Err(Error::UnknownOp(_))
    ));
    assert_eq!(
        registry::lookup("relu6").unwrap_err(),
        Error::UnknownOp("relu6".to_string())
    );
    Ok(())
}

#[test]
fn test_default_extra_args() -> Result<(), Error> {
    assert_eq!(registry::metadata("relu")?.default_extra_args, vec![0.0]);
    assert_eq!(registry::metadata("leakyrelu")?.default_extra_args, vec![0.01]);
    assert_eq!(registry::metadata("elu")?.default_extra_args, vec![1.0]);
    assert_eq!(registry::metadata("pow")?.default_extra_args, vec![1.0]);
    assert!(registry::metadata("exp")?.default_extra_args.is_empty());
    Ok(())
}

#[test]
fn test_metadata() -> Result<(), Error> {
    assert_eq!(
        registry::metadata("dot")?,
        OpMetadata {
            num: 8,
            name: "dot".to_string(),
            family: OpFamily::Accumulation,
            arity: Arity::Binary,
            default_extra_args: Vec::new(),
            differentiable: true,
        }
    );
    // Zero-gradient ops still take part in differentiation.
    assert!(registry::metadata("sign")?.differentiable);
    assert!(registry::metadata("gt_scalar")?.differentiable);
    assert!(!registry::metadata("reverse")?.differentiable);
    for name in ["imax", "imin", "iamax", "iamin"] {
        assert!(!registry::metadata(name)?.differentiable);
    }
    Ok(())
}

#[test]
fn test_every_family_is_populated() {
    let families: HashSet<OpFamily> = registry::all().map(|d| d.family()).collect();
    for family in [
        OpFamily::Transform,
        OpFamily::Scalar,
        OpFamily::Accumulation,
        OpFamily::IndexAccumulation,
        OpFamily::Custom,
    ] {
        assert!(families.contains(&family), "{:?} has no ops", family);
    }
}

#[cfg(feature = "serialization")]
#[test]
fn test_registry_json_export() -> Result<(), Error> {
    let json = registry::to_json()?;
    let table: Vec<OpMetadata> = serde_json::from_str(&json).expect("valid json");
    assert_eq!(table.len(), registry::all().count());
    assert!(table.iter().any(|m| m.name == "im2col" && m.family == OpFamily::Custom));
    Ok(())
}

#[test]
fn test_logical_and_distance_entries() -> Result<(), Error> {
    for name in ["gte", "lte", "and", "or", "xor", "not"] {
        let meta = registry::metadata(name)?;
        assert_eq!(meta.family, OpFamily::Transform, "{}", name);
        assert!(meta.differentiable, "{}", name);
    }
    assert_eq!(registry::metadata("and")?.default_extra_args, vec![0.0]);
    assert_eq!(registry::metadata("not")?.arity, Arity::Unary);
    assert_eq!(registry::metadata("atan2")?.arity, Arity::Binary);
    assert_eq!(registry::metadata("stabilize")?.default_extra_args, vec![1.0]);

    let hamming = registry::metadata("hamming")?;
    assert_eq!(hamming.family, OpFamily::Accumulation);
    assert_eq!(hamming.arity, Arity::Binary);
    assert_eq!(registry::lookup_num(OpFamily::Accumulation, hamming.num)?.name, "hamming");
    Ok(())
}
