use std::collections::BTreeMap;

use fhir_templates_runtime::oci::archive;
use fhir_templates_runtime::overlay::operator::{
    archive_layers, extract_layers, generate_diff, merge, sort_layers,
};
use fhir_templates_runtime::overlay::FileSet;
use proptest::prelude::*;

fn tree() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        prop::sample::select(vec![
            "ADT_A01.liquid",
            "ORU_R01.liquid",
            "Resource/Patient.liquid",
            "Resource/Encounter.liquid",
            "DataType/CWE.liquid",
            "CodeSystem/CodeSystem.json",
        ])
        .prop_map(str::to_string),
        prop::collection::vec(any::<u8>(), 0..64),
        0..6,
    )
}

fn file_set(tree: &BTreeMap<String, Vec<u8>>) -> FileSet {
    FileSet::from_files(tree.clone())
}

proptest! {
    #[test]
    fn prop_diff_then_merge_reconstructs_current(
        snapshot in tree(),
        current in tree(),
        base_sequence in prop_oneof![Just(-1i64), 0i64..4],
    ) {
        let base = file_set(&snapshot).with_sequence_number(base_sequence);
        let target = file_set(&current);

        match generate_diff(&target, Some(&base)) {
            None => prop_assert_eq!(&base.files, &target.files),
            Some(diff) => {
                prop_assert!(diff.sequence_number > base_sequence.max(0));
                let merged = merge(&sort_layers(vec![diff, base]));
                prop_assert_eq!(merged.files, target.files);
            }
        }
    }

    #[test]
    fn prop_diff_survives_archiving(snapshot in tree(), current in tree()) {
        let base = file_set(&snapshot);
        let target = file_set(&current);
        prop_assume!(snapshot != current);

        let diff = generate_diff(&target, Some(&base)).unwrap();
        let blobs = archive_layers(&[base, diff]).unwrap();
        let restored = extract_layers(&blobs).unwrap();
        let merged = merge(&sort_layers(restored));
        prop_assert_eq!(merged.files, target.files);
    }

    #[test]
    fn prop_archive_round_trip(files in tree()) {
        let data = archive::archive(&files, "prop").unwrap();
        let restored = archive::extract(&data, "prop").unwrap();
        prop_assert_eq!(restored.files, file_set(&files).files);
    }
}

#[test]
fn test_chain_of_diffs() {
    let v0 = FileSet::from_files([("a.liquid", "a0"), ("b.liquid", "b0")]).with_sequence_number(0);
    let v1 = FileSet::from_files([("a.liquid", "a1"), ("b.liquid", "b0")]);
    let v2 = FileSet::from_files([("a.liquid", "a1"), ("c.liquid", "c2")]);

    let d1 = generate_diff(&v1, Some(&v0)).unwrap();
    assert_eq!(d1.sequence_number, 1);
    let d2 = generate_diff(&v2, Some(&d1)).unwrap();
    assert_eq!(d2.sequence_number, 2);
    assert!(d2.is_tombstone("b.liquid"));

    // Layers arrive out of order; sequence numbers put them back.
    let merged = merge(&sort_layers(vec![d2, v0, d1]));
    assert_eq!(merged.files, v2.files);
    assert_eq!(merged.sequence_number, 3);
}
