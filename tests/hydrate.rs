use std::io::Write;

use beacon_lake::entities::{Biosample, Dataset, Individual};
use beacon_lake::hydrate::{RowSet, hydrate, hydrate_with_list};

fn individuals() -> RowSet {
    RowSet {
        header: vec![
            "ID".to_string(),
            "sex".to_string(),
            "karyotypicSex".to_string(),
            "legacy_column".to_string(),
        ],
        rows: vec![
            vec![
                "i1".to_string(),
                r#"{"id":"NCIT:C16576","label":"female"}"#.to_string(),
                "XX".to_string(),
                "ignored".to_string(),
            ],
            vec![
                "i2".to_string(),
                "{not json".to_string(),
                "XY".to_string(),
                "ignored".to_string(),
            ],
        ],
    }
}

#[test]
fn hydration_is_repeatable() {
    let rows = individuals();
    let first: Vec<Individual> = hydrate(&rows);
    let second: Vec<Individual> = hydrate(&rows);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn unknown_columns_are_dropped() {
    let records: Vec<Individual> = hydrate(&individuals());
    let json = serde_json::to_string(&records).unwrap();
    assert!(!json.contains("legacy_column"));
    assert!(!json.contains("ignored"));
    assert_eq!(records[0].id, "i1");
    assert_eq!(records[0].sex["label"], "female");
}

#[test]
fn malformed_cells_degrade_to_text() {
    let records: Vec<Individual> = hydrate(&individuals());
    assert_eq!(records[1].sex, serde_json::Value::String("{not json".to_string()));
    assert_eq!(records[1].karyotypic_sex, "XY");
}

#[test]
fn unmatched_rows_still_yield_records() {
    let rows = RowSet {
        header: vec!["_col0".to_string()],
        rows: vec![vec!["1".to_string()], vec!["1".to_string()], vec!["1".to_string()]],
    };
    let records: Vec<Biosample> = hydrate(&rows);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0], Biosample::default());
}

#[test]
fn samples_column_is_split_per_dataset() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "id,_assemblyid,_vcflocations,_vcfchromosomemap,samples\n\
         d1,GRCH38,\"[\"\"s3://lake/d1.vcf.gz\"\"]\",\"[{{\"\"vcf\"\":\"\"s3://lake/d1.vcf.gz\"\",\"\"chromosomes\"\":[\"\"chr1\"\"]}}]\",\"[S1, S2]\"\n\
         d2,GRCH38,[],[],[]\n"
    )
    .unwrap();

    let rows = RowSet::from_csv(std::fs::File::open(file.path()).unwrap()).unwrap();
    let datasets = hydrate_with_list::<Dataset>(&rows, "samples");

    assert_eq!(datasets.len(), 2);
    let (d1, samples) = &datasets[0];
    assert_eq!(d1.id, "d1");
    assert_eq!(d1.assembly_id, "GRCH38");
    assert_eq!(d1.vcf_locations, vec!["s3://lake/d1.vcf.gz"]);
    assert_eq!(d1.vcf_chromosome_map[0].chromosomes, vec!["chr1"]);
    assert_eq!(samples, &vec!["S1".to_string(), "S2".to_string()]);
    assert!(datasets[1].1.is_empty());
}
