use std::collections::HashSet;
use std::fs;
use std::path::Path;

// The bundled coefficient table is compiled into the binary with `include_str!`. Its
// shape is checked here so that a broken table fails the build instead of the first
// request.

const BUNDLED_TABLE: &str = "data/horvath2013_demo.tsv";
const EXPECTED_SITES: usize = 353;
const INTERCEPT_LABEL: &str = "(Intercept)";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={BUNDLED_TABLE}");
    println!("cargo:rerun-if-env-changed=EPICLOCK_RELEASE_TAG");

    if let Err(e) = check_bundled_table(Path::new(BUNDLED_TABLE)) {
        eprintln!("\n❌ ERROR: The bundled coefficient table '{BUNDLED_TABLE}' is invalid.");
        eprintln!("   {e}\n");
        std::process::exit(1);
    }
}

fn check_bundled_table(path: &Path) -> Result<(), String> {
    let text = fs::read_to_string(path).map_err(|e| format!("cannot read the file: {e}"))?;
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.starts_with('#') && !line.trim().is_empty());

    let (_, header) = lines.next().ok_or("the file has no header row")?;
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let site_col = columns
        .iter()
        .position(|c| *c == "cpg_id")
        .ok_or("the header has no 'cpg_id' column")?;
    let weight_col = columns
        .iter()
        .position(|c| *c == "weight")
        .ok_or("the header has no 'weight' column")?;

    let mut intercepts = 0usize;
    let mut sites = HashSet::new();
    for (idx, line) in lines {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let line_number = idx + 1;
        let (Some(site), Some(weight)) = (fields.get(site_col), fields.get(weight_col)) else {
            return Err(format!("line {line_number} is missing a column"));
        };
        let value: f64 = weight
            .parse()
            .map_err(|_| format!("line {line_number} has a non-numeric weight '{weight}'"))?;
        if !value.is_finite() {
            return Err(format!("line {line_number} has a non-finite weight"));
        }
        if *site == INTERCEPT_LABEL {
            intercepts += 1;
        } else if !sites.insert(site.to_string()) {
            return Err(format!("line {line_number} repeats site '{site}'"));
        }
    }

    if intercepts != 1 {
        return Err(format!(
            "expected exactly one '{INTERCEPT_LABEL}' row, found {intercepts}"
        ));
    }
    if sites.len() != EXPECTED_SITES {
        return Err(format!(
            "expected {EXPECTED_SITES} CpG sites, found {}",
            sites.len()
        ));
    }
    Ok(())
}
