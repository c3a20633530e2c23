//! Property-based testing for ragnarok
//!
//! Uses proptest to check the path mapping and version ordering laws
//! across randomly generated inputs.

use ::ragnarok::config::parse_selection_list;
use ::ragnarok::packages::compare_versions;
use ::ragnarok::*;
use proptest::prelude::*;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Absolute paths built from plain segments, with the occasional `.` or `..`
fn absolute_path_strategy() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec(
        prop_oneof![
            8 => "[a-z0-9_-]{1,10}",
            1 => Just(".".to_string()),
            1 => Just("..".to_string()),
            1 => Just("home".to_string()),
            1 => Just("root".to_string()),
        ],
        0..6,
    )
    .prop_map(|segments| {
        let mut path = PathBuf::from("/");
        for segment in segments {
            path.push(segment);
        }
        path
    })
}

fn home_strategy() -> impl Strategy<Value = PathBuf> {
    prop_oneof![
        Just(PathBuf::from("/root")),
        "[a-z]{1,8}".prop_map(|user| PathBuf::from(format!("/home/{}", user))),
        "[a-z]{1,8}".prop_map(|dir| PathBuf::from(format!("/srv/{}", dir))),
    ]
}

/// Debian-style version strings: optional epoch, upstream, optional revision
fn version_strategy() -> impl Strategy<Value = String> {
    (
        prop::option::of(0u32..3),
        "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(~[a-z]{1,3})?",
        prop::option::of("[0-9]{1,2}(ubuntu[0-9])?"),
    )
        .prop_map(|(epoch, upstream, revision)| {
            let mut version = String::new();
            if let Some(epoch) = epoch {
                version.push_str(&format!("{}:", epoch));
            }
            version.push_str(&upstream);
            if let Some(revision) = revision {
                version.push('-');
                version.push_str(&revision);
            }
            version
        })
}

proptest! {
    #[test]
    fn prop_mapper_is_total_and_deterministic(
        path in absolute_path_strategy(),
        home in home_strategy(),
    ) {
        let mapper = PathMapper::new(&home);
        let first = mapper.map(&path).unwrap();
        let second = mapper.map(&path).unwrap();
        prop_assert_eq!(&first, &second);

        let bucket = first.bucket.as_str();
        let bucket_prefix = format!("{}/", bucket);
        prop_assert!(first.relative == bucket || first.relative.starts_with(&bucket_prefix));
        prop_assert!(!first.relative.split('/').any(|s| s == ".." || s == "." || s.is_empty()));
    }

    #[test]
    fn prop_home_paths_land_in_home_bucket(
        rest in prop::collection::vec("[a-z]{1,8}", 0..4),
        home in home_strategy(),
    ) {
        let mut path = home.clone();
        for segment in &rest {
            path.push(segment);
        }
        let mapped = map_path(&path, &home).unwrap();
        prop_assert_eq!(mapped.bucket, Bucket::HomeDirs);

        let user = home.file_name().unwrap().to_string_lossy().into_owned();
        let mut expected = format!("home_dirs/{}", user);
        for segment in &rest {
            expected.push('/');
            expected.push_str(segment);
        }
        prop_assert_eq!(mapped.relative, expected);
    }

    #[test]
    fn prop_relative_paths_are_rejected(segment in "[a-z]{1,8}") {
        let err = map_path(Path::new(&segment), Path::new("/root")).unwrap_err();
        let is_invalid_path = matches!(err, RagnarokError::InvalidPath { .. });
        prop_assert!(is_invalid_path);
    }

    #[test]
    fn prop_version_order_is_reflexive_and_antisymmetric(
        a in version_strategy(),
        b in version_strategy(),
    ) {
        prop_assert_eq!(compare_versions(&a, &a), Ordering::Equal);
        prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
    }

    #[test]
    fn prop_version_order_is_transitive(
        a in version_strategy(),
        b in version_strategy(),
        c in version_strategy(),
    ) {
        let mut sorted = vec![a, b, c];
        sorted.sort_by(|x, y| compare_versions(x, y));
        prop_assert!(compare_versions(&sorted[0], &sorted[1]) != Ordering::Greater);
        prop_assert!(compare_versions(&sorted[1], &sorted[2]) != Ordering::Greater);
        prop_assert!(compare_versions(&sorted[0], &sorted[2]) != Ordering::Greater);
    }

    #[test]
    fn prop_tilde_sorts_before_release(base in "[0-9]{1,2}\\.[0-9]{1,2}", pre in "[a-z]{1,4}") {
        let prerelease = format!("{}~{}", base, pre);
        prop_assert_eq!(compare_versions(&prerelease, &base), Ordering::Less);
    }

    #[test]
    fn prop_selection_list_ignores_comments_and_blanks(
        paths in prop::collection::vec("/[a-z]{1,8}(/[a-z]{1,8}){0,2}", 0..6),
        padding in "[ \t]{0,3}",
    ) {
        let mut text = String::from("# header\n\n");
        for path in &paths {
            text.push_str(&format!("{}{}{}\n#{}\n\n", padding, path, padding, path));
        }
        let parsed = parse_selection_list(&text);
        let expected: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
        prop_assert_eq!(parsed, expected);
    }
}
