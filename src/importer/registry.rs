// ==========================================
// 校车车队管理系统 - 导入类型注册表
// ==========================================
// 职责: 每种导入类型的静态描述
//   - 表头提示词（模糊匹配）
//   - 字段 → 规则列表
//   - 目标表 / 去重键
//   - 列名同义词
//   - 是否存在分区横幅（仅里程）
// ==========================================

use crate::domain::{ImportType, Severity};
use crate::importer::rules::Rule;

// ==========================================
// 字段类型（决定规则通过后的类型转换）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Date,
    Time,
    Boolean,
    Phone,
    Grade,
    Status,
}

// ==========================================
// FieldSpec - 规范字段描述
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub rules: &'static [Rule],
    /// 规则失败时的问题级别（可选补充字段为 Warning）
    pub on_fail: Severity,
    /// 空值或 Warning 级失败时的替代值
    pub default_value: Option<&'static str>,
    /// 派生字段：不可映射，由管道填充
    pub derived: bool,
}

impl FieldSpec {
    const fn mapped(name: &'static str, kind: FieldKind, rules: &'static [Rule]) -> Self {
        Self {
            name,
            kind,
            rules,
            on_fail: Severity::Error,
            default_value: None,
            derived: false,
        }
    }

    const fn soft(name: &'static str, kind: FieldKind, rules: &'static [Rule]) -> Self {
        Self {
            name,
            kind,
            rules,
            on_fail: Severity::Warning,
            default_value: None,
            derived: false,
        }
    }

    const fn derived(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            rules: &[],
            on_fail: Severity::Error,
            default_value: None,
            derived: true,
        }
    }

    const fn with_default(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn is_required(&self) -> bool {
        self.rules.contains(&Rule::Required)
    }
}

// ==========================================
// ImportTypeSpec - 导入类型描述
// ==========================================
#[derive(Debug)]
pub struct ImportTypeSpec {
    pub import_type: ImportType,
    pub expected_headers: &'static [&'static str],
    pub fields: &'static [FieldSpec],
    pub upsert_key: &'static [&'static str],
    pub table: &'static str,
    /// 标准化表头 → 规范字段
    pub aliases: &'static [(&'static str, &'static str)],
    /// 工作表内是否含分区横幅
    pub has_sections: bool,
    /// 是否需要分析全部工作表（否则只分析第一个）
    pub all_sheets: bool,
}

impl ImportTypeSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 可映射字段（排除派生字段）
    pub fn mappable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.derived)
    }

    pub fn required_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.is_required())
            .map(|f| f.name)
            .collect()
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.upsert_key.contains(&name)
    }

    /// 表头判定阈值 ⌈|expected| / 2⌉
    pub fn header_threshold(&self) -> usize {
        (self.expected_headers.len() + 1) / 2
    }

    /// 单元格是否包含任一表头提示词（大小写不敏感）
    pub fn cell_matches_hint(&self, cell: &str) -> bool {
        let lower = cell.trim().to_lowercase();
        !lower.is_empty() && self.expected_headers.iter().any(|hint| lower.contains(hint))
    }

    /// 行是否满足表头判定
    pub fn is_header_row(&self, cells: &[String]) -> bool {
        let matches = cells.iter().filter(|c| self.cell_matches_hint(c)).count();
        matches >= self.header_threshold()
    }

    /// 同义词查找
    pub fn resolve_alias(&self, normalized: &str) -> Option<&'static str> {
        self.aliases
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, field)| *field)
    }
}

// ==========================================
// 规则集
// ==========================================
const MILEAGE_READING: &[Rule] = &[
    Rule::Required,
    Rule::Numeric,
    Rule::Positive,
    Rule::MaxValue(999_999),
];
const VEHICLE_YEAR: &[Rule] = &[
    Rule::Numeric,
    Rule::YearRange {
        min: 1900,
        years_ahead: 2,
    },
];
const PERSON_NAME: &[Rule] = &[Rule::Required, Rule::Name, Rule::MaxLength(100)];
const RECORD_ID: &[Rule] = &[Rule::MaxLength(50)];

// ==========================================
// MILEAGE
// ==========================================
static MILEAGE_FIELDS: &[FieldSpec] = &[
    FieldSpec::mapped(
        "vehicle_id",
        FieldKind::Text,
        &[Rule::Required, Rule::VehicleIdFormat],
    ),
    FieldSpec::mapped("beginning_mileage", FieldKind::Integer, MILEAGE_READING),
    FieldSpec::mapped("ending_mileage", FieldKind::Integer, MILEAGE_READING),
    FieldSpec::mapped(
        "total_miles",
        FieldKind::Integer,
        &[Rule::Numeric, Rule::Positive, Rule::MaxValue(999_999)],
    ),
    FieldSpec::mapped("vehicle_year", FieldKind::Integer, VEHICLE_YEAR),
    FieldSpec::mapped("make", FieldKind::Text, &[Rule::MaxLength(50)]),
    FieldSpec::soft("license_plate", FieldKind::Text, &[Rule::LicensePlate]),
    FieldSpec::mapped("location", FieldKind::Text, &[Rule::MaxLength(100)]),
    FieldSpec::derived("report_month", FieldKind::Text),
    FieldSpec::derived("report_year", FieldKind::Integer),
    FieldSpec::derived("vehicle_category", FieldKind::Text),
];

static MILEAGE_ALIASES: &[(&str, &str)] = &[
    ("id", "vehicle_id"),
    ("vehicle", "vehicle_id"),
    ("vehicle_number", "vehicle_id"),
    ("bus_number", "vehicle_id"),
    ("bus_id", "vehicle_id"),
    ("beginning", "beginning_mileage"),
    ("begin", "beginning_mileage"),
    ("beginning_miles", "beginning_mileage"),
    ("start_mileage", "beginning_mileage"),
    ("ending", "ending_mileage"),
    ("end", "ending_mileage"),
    ("ending_miles", "ending_mileage"),
    ("end_mileage", "ending_mileage"),
    ("total", "total_miles"),
    ("miles", "total_miles"),
    ("year", "vehicle_year"),
    ("lic", "license_plate"),
    ("license", "license_plate"),
    ("plate", "license_plate"),
    ("located", "location"),
    ("located_at", "location"),
];

static MILEAGE: ImportTypeSpec = ImportTypeSpec {
    import_type: ImportType::Mileage,
    expected_headers: &[
        "vehicle", "beginning", "ending", "total", "miles", "id", "location",
    ],
    fields: MILEAGE_FIELDS,
    upsert_key: &["vehicle_id", "report_month", "report_year"],
    table: "mileage_records",
    aliases: MILEAGE_ALIASES,
    has_sections: true,
    all_sheets: true,
};

// ==========================================
// ECSE
// ==========================================
static ECSE_FIELDS: &[FieldSpec] = &[
    FieldSpec::mapped("student_id", FieldKind::Text, RECORD_ID),
    FieldSpec::mapped("name", FieldKind::Text, PERSON_NAME),
    FieldSpec::mapped(
        "dob",
        FieldKind::Date,
        &[
            Rule::Required,
            Rule::Date,
            Rule::AgeRange { min: 0, max: 21 },
        ],
    ),
    FieldSpec::mapped("phone", FieldKind::Phone, &[Rule::Required, Rule::Phone]),
    FieldSpec::mapped("address", FieldKind::Text, &[Rule::MaxLength(200)]),
    FieldSpec::mapped("iep_status", FieldKind::Boolean, &[Rule::Boolean]),
    FieldSpec::mapped("speech_therapy", FieldKind::Boolean, &[Rule::Boolean]),
    FieldSpec::mapped("occupational_therapy", FieldKind::Boolean, &[Rule::Boolean]),
    FieldSpec::mapped("physical_therapy", FieldKind::Boolean, &[Rule::Boolean]),
];

static ECSE_ALIASES: &[(&str, &str)] = &[
    ("id", "student_id"),
    ("student_number", "student_id"),
    ("student_name", "name"),
    ("full_name", "name"),
    ("date_of_birth", "dob"),
    ("birth_date", "dob"),
    ("birthdate", "dob"),
    ("telephone", "phone"),
    ("phone_number", "phone"),
    ("iep", "iep_status"),
    ("speech", "speech_therapy"),
    ("ot", "occupational_therapy"),
    ("pt", "physical_therapy"),
];

static ECSE: ImportTypeSpec = ImportTypeSpec {
    import_type: ImportType::Ecse,
    expected_headers: &[
        "name", "dob", "phone", "address", "iep", "speech", "ot", "pt",
    ],
    fields: ECSE_FIELDS,
    upsert_key: &["student_id"],
    table: "ecse_students",
    aliases: ECSE_ALIASES,
    has_sections: false,
    all_sheets: false,
};

// ==========================================
// STUDENT
// ==========================================
static STUDENT_FIELDS: &[FieldSpec] = &[
    FieldSpec::mapped("student_id", FieldKind::Text, RECORD_ID),
    FieldSpec::mapped("name", FieldKind::Text, PERSON_NAME),
    FieldSpec::mapped("grade", FieldKind::Grade, &[Rule::Required, Rule::Grade]),
    FieldSpec::mapped(
        "address",
        FieldKind::Text,
        &[Rule::Required, Rule::MaxLength(200)],
    ),
    FieldSpec::mapped("phone", FieldKind::Phone, &[Rule::Required, Rule::Phone]),
    FieldSpec::mapped(
        "guardian",
        FieldKind::Text,
        &[Rule::Name, Rule::MaxLength(100)],
    ),
    FieldSpec::soft("pickup_time", FieldKind::Time, &[Rule::Time]),
    FieldSpec::soft("dropoff_time", FieldKind::Time, &[Rule::Time]),
];

static STUDENT_ALIASES: &[(&str, &str)] = &[
    ("id", "student_id"),
    ("student_number", "student_id"),
    ("student_name", "name"),
    ("full_name", "name"),
    ("telephone", "phone"),
    ("phone_number", "phone"),
    ("parent", "guardian"),
    ("guardian_name", "guardian"),
    ("parent_name", "guardian"),
    ("pickup", "pickup_time"),
    ("pick_up_time", "pickup_time"),
    ("dropoff", "dropoff_time"),
    ("drop_off_time", "dropoff_time"),
];

static STUDENT: ImportTypeSpec = ImportTypeSpec {
    import_type: ImportType::Student,
    expected_headers: &[
        "name", "grade", "address", "phone", "guardian", "pickup", "dropoff",
    ],
    fields: STUDENT_FIELDS,
    upsert_key: &["student_id"],
    table: "students",
    aliases: STUDENT_ALIASES,
    has_sections: false,
    all_sheets: false,
};

// ==========================================
// VEHICLE
// ==========================================
static VEHICLE_FIELDS: &[FieldSpec] = &[
    FieldSpec::mapped(
        "vehicle_id",
        FieldKind::Text,
        &[Rule::Required, Rule::VehicleIdFormat],
    ),
    FieldSpec::mapped(
        "year",
        FieldKind::Integer,
        &[
            Rule::Required,
            Rule::Numeric,
            Rule::YearRange {
                min: 1900,
                years_ahead: 2,
            },
        ],
    ),
    FieldSpec::mapped(
        "make",
        FieldKind::Text,
        &[Rule::Required, Rule::MaxLength(50)],
    ),
    FieldSpec::mapped(
        "model",
        FieldKind::Text,
        &[Rule::Required, Rule::MaxLength(50)],
    ),
    FieldSpec::soft("vin", FieldKind::Text, &[Rule::Vin]),
    FieldSpec::soft("license_plate", FieldKind::Text, &[Rule::LicensePlate]),
    FieldSpec::soft("status", FieldKind::Status, &[Rule::VehicleStatus]).with_default("active"),
    FieldSpec::derived("vehicle_type", FieldKind::Text),
];

static VEHICLE_ALIASES: &[(&str, &str)] = &[
    ("id", "vehicle_id"),
    ("vehicle", "vehicle_id"),
    ("vehicle_number", "vehicle_id"),
    ("bus_number", "vehicle_id"),
    ("bus_id", "vehicle_id"),
    ("unit", "vehicle_id"),
    ("model_year", "year"),
    ("vin_number", "vin"),
    ("license", "license_plate"),
    ("plate", "license_plate"),
    ("lic", "license_plate"),
    ("vehicle_status", "status"),
];

static VEHICLE: ImportTypeSpec = ImportTypeSpec {
    import_type: ImportType::Vehicle,
    expected_headers: &[
        "vehicle", "year", "make", "model", "vin", "license", "status",
    ],
    fields: VEHICLE_FIELDS,
    upsert_key: &["vehicle_id"],
    table: "vehicles",
    aliases: VEHICLE_ALIASES,
    has_sections: false,
    all_sheets: false,
};

/// 获取导入类型描述
pub fn spec_for(import_type: ImportType) -> &'static ImportTypeSpec {
    match import_type {
        ImportType::Mileage => &MILEAGE,
        ImportType::Ecse => &ECSE,
        ImportType::Student => &STUDENT,
        ImportType::Vehicle => &VEHICLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields_match_registry_table() {
        assert_eq!(
            spec_for(ImportType::Mileage).required_fields(),
            vec!["vehicle_id", "beginning_mileage", "ending_mileage"]
        );
        assert_eq!(
            spec_for(ImportType::Ecse).required_fields(),
            vec!["name", "dob", "phone"]
        );
        assert_eq!(
            spec_for(ImportType::Student).required_fields(),
            vec!["name", "grade", "address", "phone"]
        );
        assert_eq!(
            spec_for(ImportType::Vehicle).required_fields(),
            vec!["vehicle_id", "year", "make", "model"]
        );
    }

    #[test]
    fn test_header_threshold_is_ceiling_of_half() {
        assert_eq!(spec_for(ImportType::Mileage).header_threshold(), 4);
        assert_eq!(spec_for(ImportType::Ecse).header_threshold(), 4);
        assert_eq!(spec_for(ImportType::Student).header_threshold(), 4);
    }

    #[test]
    fn test_mileage_header_row_detection() {
        let spec = spec_for(ImportType::Mileage);
        let header: Vec<String> = ["Year", "Make", "Lic", "ID", "Located", "Beginning", "Ending", "Total"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(spec.is_header_row(&header));

        let banner = vec!["Agency Vehicles".to_string()];
        assert!(!spec.is_header_row(&banner));
    }

    #[test]
    fn test_keys_and_tables() {
        let mileage = spec_for(ImportType::Mileage);
        assert!(mileage.is_key_field("report_month"));
        assert_eq!(mileage.table, "mileage_records");
        assert!(mileage.field("report_year").map(|f| f.derived).unwrap_or(false));
        assert_eq!(spec_for(ImportType::Vehicle).table, "vehicles");
        assert_eq!(
            spec_for(ImportType::Vehicle)
                .field("status")
                .and_then(|f| f.default_value),
            Some("active")
        );
    }

    #[test]
    fn test_aliases() {
        assert_eq!(
            spec_for(ImportType::Student).resolve_alias("telephone"),
            Some("phone")
        );
        assert_eq!(
            spec_for(ImportType::Vehicle).resolve_alias("vehicle_number"),
            Some("vehicle_id")
        );
        assert_eq!(spec_for(ImportType::Ecse).resolve_alias("unknown"), None);
    }
}
