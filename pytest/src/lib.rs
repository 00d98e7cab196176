use core::panic;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::Serialize;

/// Used by `inventory` to collect test case metadata and process them on per
/// crate basis in `generate_functional_test_manifest`.
#[derive(Default, Debug)]
pub struct TestCaseMetadata<'a> {
    pub module: &'a str,
    pub function: &'a str,
    pub negative: bool,
    pub xfail: Option<&'a str>,
    pub skip: Option<&'a str>,
    pub feature: &'a str,
    pub type_: &'a str,
}

#[derive(Serialize, Default, Debug)]
#[serde(transparent)]
struct Manifest {
    crates: HashMap<String, Module>,
}

/// Represents a rust module.
#[derive(Serialize, Default, Debug)]
struct Module {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    test_cases: HashMap<String, TestCaseInfo>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    submodules: HashMap<String, Module>,
}

/// Represents a specific test case.
#[derive(Serialize, Default, Debug)]
struct TestCaseInfo {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    markers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    xfail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip: Option<String>,
}

// Registers `TestCaseMetadata` with `inventory` for further processing.
inventory::collect!(TestCaseMetadata<'static>);

pub fn generate_functional_test_manifest() {
    std::fs::write(
        get_functional_test_dir().join("ft.json"),
        serde_json::to_string_pretty(&generate_manifest()).unwrap(),
    )
    .unwrap();
}

fn get_functional_test_dir() -> PathBuf {
    let func_test_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("functional_tests")
        .canonicalize()
        .expect("failed to canonicalize functional_tests dir");

    if !func_test_dir.exists() {
        panic!(
            "Could not find functional_tests directory in {}",
            func_test_dir.display()
        );
    }

    func_test_dir
}

fn generate_manifest() -> Manifest {
    let mut manifest = Manifest::default();

    inventory::iter::<TestCaseMetadata>().for_each(|item| {
        let mut module_path_iter = item.module.split("::");
        let rust_crate = module_path_iter.next().unwrap();
        let mut module = manifest.crates.entry(rust_crate.to_string()).or_default();

        for rust_module in module_path_iter {
            module = module
                .submodules
                .entry(rust_module.to_string())
                .or_default();
        }

        module.test_cases.insert(
            item.function.to_string(),
            TestCaseInfo {
                xfail: item.xfail.map(|s| s.to_string()),
                skip: item.skip.map(|s| s.to_string()),
                markers: make_markers(item),
            },
        );
    });

    manifest
}

const DEFAULT_TYPE: &str = "functional";
const DEFAULT_FEATURE: &str = "core";
const POSITIVE_STR: &str = "positive";
const NEGATIVE_STR: &str = "negative";

fn make_markers(item: &TestCaseMetadata) -> Vec<String> {
    [
        if item.type_.is_empty() || item.type_ == DEFAULT_TYPE {
            DEFAULT_TYPE
        } else {
            panic!("Unsupported test type: '{}'.", item.type_);
        },
        if item.negative { NEGATIVE_STR } else { POSITIVE_STR },
        match item.feature {
            "" => DEFAULT_FEATURE,
            feature => feature,
        },
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_sample_metadata() -> TestCaseMetadata<'static> {
        TestCaseMetadata {
            module: "osutils::blkid",
            function: "test_sample",
            negative: false,
            xfail: None,
            skip: None,
            feature: "helpers",
            type_: "",
        }
    }

    #[test]
    fn test_make_markers() {
        let positive = get_sample_metadata();
        assert_eq!(
            make_markers(&positive),
            vec!["functional".to_string(), "positive".to_string(), "helpers".to_string()]
        );

        let mut negative = get_sample_metadata();
        negative.negative = true;
        negative.feature = "";
        assert_eq!(
            make_markers(&negative),
            vec!["functional".to_string(), "negative".to_string(), "core".to_string()]
        );
    }

    #[test]
    #[should_panic(expected = "Unsupported test type: 'unexpected-type'.")]
    fn test_make_markers_unsupported_type() {
        let mut metadata = get_sample_metadata();
        metadata.type_ = "unexpected-type";
        make_markers(&metadata);
    }

    #[test]
    fn test_get_functional_test_dir() {
        let func_test_dir = get_functional_test_dir();
        assert!(func_test_dir.exists());
        assert!(func_test_dir.is_dir());
    }

    inventory::submit! {
        TestCaseMetadata {
            module: "pytest::pytest_gen",
            function: "test_foo",
            negative: false,
            xfail: None,
            skip: None,
            feature: "",
            type_: "",
        }
    }

    #[test]
    fn test_generate_manifest() {
        let manifest = generate_manifest();
        let pytest_crate = manifest.crates.get("pytest").expect("pytest crate entry missing");
        let pytest_gen_mod = pytest_crate
            .submodules
            .get("pytest_gen")
            .expect("pytest::pytest_gen submodule missing");
        let test_foo = pytest_gen_mod
            .test_cases
            .get("test_foo")
            .expect("test_foo case missing");
        assert_eq!(test_foo.markers, vec!["functional", "positive", "core"]);
    }
}
