//! Beacon entity schemas and their column mappings.
//!
//! Fields whose canonical name starts with `_` are internal lake columns; they
//! are hydrated but never serialized into responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hydrate::{Field, Hydrate, text, text_list};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Individual {
    pub id: String,
    pub dataset_id: String,
    pub cohort_id: String,
    pub diseases: Value,
    pub ethnicity: Value,
    pub exposures: Value,
    pub geographic_origin: Value,
    pub info: Value,
    pub interventions_or_procedures: Value,
    pub karyotypic_sex: String,
    pub measures: Value,
    pub pedigrees: Value,
    pub phenotypic_features: Value,
    pub sex: Value,
    pub treatments: Value,
}

impl Hydrate for Individual {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "id", set: |r, v| r.id = text(v) },
        Field { name: "datasetId", set: |r, v| r.dataset_id = text(v) },
        Field { name: "cohortId", set: |r, v| r.cohort_id = text(v) },
        Field { name: "diseases", set: |r, v| r.diseases = v },
        Field { name: "ethnicity", set: |r, v| r.ethnicity = v },
        Field { name: "exposures", set: |r, v| r.exposures = v },
        Field { name: "geographicOrigin", set: |r, v| r.geographic_origin = v },
        Field { name: "info", set: |r, v| r.info = v },
        Field { name: "interventionsOrProcedures", set: |r, v| r.interventions_or_procedures = v },
        Field { name: "karyotypicSex", set: |r, v| r.karyotypic_sex = text(v) },
        Field { name: "measures", set: |r, v| r.measures = v },
        Field { name: "pedigrees", set: |r, v| r.pedigrees = v },
        Field { name: "phenotypicFeatures", set: |r, v| r.phenotypic_features = v },
        Field { name: "sex", set: |r, v| r.sex = v },
        Field { name: "treatments", set: |r, v| r.treatments = v },
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Biosample {
    pub id: String,
    pub dataset_id: String,
    pub cohort_id: String,
    pub individual_id: String,
    pub biosample_status: Value,
    pub collection_date: String,
    pub collection_moment: String,
    pub diagnostic_markers: Value,
    pub histological_diagnosis: Value,
    pub info: Value,
    pub measurements: Value,
    pub notes: String,
    pub obtention_procedure: Value,
    pub pathological_stage: Value,
    pub pathological_tnm_finding: Value,
    pub phenotypic_features: Value,
    pub sample_origin_detail: Value,
    pub sample_origin_type: Value,
    pub sample_processing: Value,
    pub sample_storage: Value,
    pub tumor_grade: Value,
    pub tumor_progression: Value,
}

impl Hydrate for Biosample {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "id", set: |r, v| r.id = text(v) },
        Field { name: "datasetId", set: |r, v| r.dataset_id = text(v) },
        Field { name: "cohortId", set: |r, v| r.cohort_id = text(v) },
        Field { name: "individualId", set: |r, v| r.individual_id = text(v) },
        Field { name: "biosampleStatus", set: |r, v| r.biosample_status = v },
        Field { name: "collectionDate", set: |r, v| r.collection_date = text(v) },
        Field { name: "collectionMoment", set: |r, v| r.collection_moment = text(v) },
        Field { name: "diagnosticMarkers", set: |r, v| r.diagnostic_markers = v },
        Field { name: "histologicalDiagnosis", set: |r, v| r.histological_diagnosis = v },
        Field { name: "info", set: |r, v| r.info = v },
        Field { name: "measurements", set: |r, v| r.measurements = v },
        Field { name: "notes", set: |r, v| r.notes = text(v) },
        Field { name: "obtentionProcedure", set: |r, v| r.obtention_procedure = v },
        Field { name: "pathologicalStage", set: |r, v| r.pathological_stage = v },
        Field { name: "pathologicalTnmFinding", set: |r, v| r.pathological_tnm_finding = v },
        Field { name: "phenotypicFeatures", set: |r, v| r.phenotypic_features = v },
        Field { name: "sampleOriginDetail", set: |r, v| r.sample_origin_detail = v },
        Field { name: "sampleOriginType", set: |r, v| r.sample_origin_type = v },
        Field { name: "sampleProcessing", set: |r, v| r.sample_processing = v },
        Field { name: "sampleStorage", set: |r, v| r.sample_storage = v },
        Field { name: "tumorGrade", set: |r, v| r.tumor_grade = v },
        Field { name: "tumorProgression", set: |r, v| r.tumor_progression = v },
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub dataset_id: String,
    pub individual_id: String,
    pub biosample_id: String,
    pub info: Value,
    pub library_layout: String,
    pub library_selection: String,
    pub library_source: Value,
    pub library_strategy: String,
    pub platform: String,
    pub platform_model: Value,
    pub run_date: String,
}

impl Hydrate for Run {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "id", set: |r, v| r.id = text(v) },
        Field { name: "datasetId", set: |r, v| r.dataset_id = text(v) },
        Field { name: "individualId", set: |r, v| r.individual_id = text(v) },
        Field { name: "biosampleId", set: |r, v| r.biosample_id = text(v) },
        Field { name: "info", set: |r, v| r.info = v },
        Field { name: "libraryLayout", set: |r, v| r.library_layout = text(v) },
        Field { name: "librarySelection", set: |r, v| r.library_selection = text(v) },
        Field { name: "librarySource", set: |r, v| r.library_source = v },
        Field { name: "libraryStrategy", set: |r, v| r.library_strategy = text(v) },
        Field { name: "platform", set: |r, v| r.platform = text(v) },
        Field { name: "platformModel", set: |r, v| r.platform_model = v },
        Field { name: "runDate", set: |r, v| r.run_date = text(v) },
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub dataset_id: String,
    pub individual_id: String,
    pub biosample_id: String,
    pub run_id: String,
    pub aligner: String,
    pub analysis_date: String,
    pub info: Value,
    pub pipeline_name: String,
    pub pipeline_ref: String,
    pub variant_caller: String,
    #[serde(skip_serializing)]
    pub vcf_sample_id: String,
}

impl Hydrate for Analysis {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "id", set: |r, v| r.id = text(v) },
        Field { name: "datasetId", set: |r, v| r.dataset_id = text(v) },
        Field { name: "individualId", set: |r, v| r.individual_id = text(v) },
        Field { name: "biosampleId", set: |r, v| r.biosample_id = text(v) },
        Field { name: "runId", set: |r, v| r.run_id = text(v) },
        Field { name: "aligner", set: |r, v| r.aligner = text(v) },
        Field { name: "analysisDate", set: |r, v| r.analysis_date = text(v) },
        Field { name: "info", set: |r, v| r.info = v },
        Field { name: "pipelineName", set: |r, v| r.pipeline_name = text(v) },
        Field { name: "pipelineRef", set: |r, v| r.pipeline_ref = text(v) },
        Field { name: "variantCaller", set: |r, v| r.variant_caller = text(v) },
        Field { name: "_vcfSampleId", set: |r, v| r.vcf_sample_id = text(v) },
    ];
}

/// One VCF of a dataset and the contig names it contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcfChromosomes {
    pub vcf: String,
    #[serde(default)]
    pub chromosomes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub external_url: String,
    pub info: Value,
    pub data_use_conditions: Value,
    pub create_date_time: String,
    pub update_date_time: String,
    #[serde(skip_serializing)]
    pub assembly_id: String,
    #[serde(skip_serializing)]
    pub vcf_locations: Vec<String>,
    #[serde(skip_serializing)]
    pub vcf_chromosome_map: Vec<VcfChromosomes>,
}

impl Hydrate for Dataset {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "id", set: |r, v| r.id = text(v) },
        Field { name: "name", set: |r, v| r.name = text(v) },
        Field { name: "description", set: |r, v| r.description = text(v) },
        Field { name: "version", set: |r, v| r.version = text(v) },
        Field { name: "externalUrl", set: |r, v| r.external_url = text(v) },
        Field { name: "info", set: |r, v| r.info = v },
        Field { name: "dataUseConditions", set: |r, v| r.data_use_conditions = v },
        Field { name: "createDateTime", set: |r, v| r.create_date_time = text(v) },
        Field { name: "updateDateTime", set: |r, v| r.update_date_time = text(v) },
        Field { name: "_assemblyId", set: |r, v| r.assembly_id = text(v) },
        Field { name: "_vcfLocations", set: |r, v| r.vcf_locations = text_list(v) },
        Field { name: "_vcfChromosomeMap", set: |r, v| r.vcf_chromosome_map = chromosome_map(v) },
    ];
}

fn chromosome_map(value: Value) -> Vec<VcfChromosomes> {
    serde_json::from_value(value).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "unreadable vcf chromosome map, treating as empty");
        Vec::new()
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cohort {
    pub id: String,
    pub name: String,
    pub cohort_type: String,
    pub cohort_design: Value,
    pub cohort_size: Value,
    pub cohort_data_types: Value,
    pub collection_events: Value,
    pub exclusion_criteria: Value,
    pub inclusion_criteria: Value,
}

impl Hydrate for Cohort {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "id", set: |r, v| r.id = text(v) },
        Field { name: "name", set: |r, v| r.name = text(v) },
        Field { name: "cohortType", set: |r, v| r.cohort_type = text(v) },
        Field { name: "cohortDesign", set: |r, v| r.cohort_design = v },
        Field { name: "cohortSize", set: |r, v| r.cohort_size = v },
        Field { name: "cohortDataTypes", set: |r, v| r.cohort_data_types = v },
        Field { name: "collectionEvents", set: |r, v| r.collection_events = v },
        Field { name: "exclusionCriteria", set: |r, v| r.exclusion_criteria = v },
        Field { name: "inclusionCriteria", set: |r, v| r.inclusion_criteria = v },
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilteringTerm {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub term_type: String,
}

impl Hydrate for FilteringTerm {
    const FIELDS: &'static [Field<Self>] = &[
        Field { name: "term", set: |r, v| r.id = text(v) },
        Field { name: "label", set: |r, v| r.label = text(v) },
        Field { name: "type", set: |r, v| r.term_type = text(v) },
    ];
}
