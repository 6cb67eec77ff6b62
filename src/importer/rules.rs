// ==========================================
// 校车车队管理系统 - 字段校验规则
// ==========================================
// 职责: 规则原语（一等值）与短路求值
// 约定: 除 Required 外，所有规则对空值放行
// ==========================================

use crate::domain::ErrorType;
use crate::importer::data_cleaner::{
    age_on, normalize_grade, parse_boolean, parse_date, parse_integer, parse_time, phone_digits,
};
use chrono::{Datelike, NaiveDate};

/// 名称中禁止出现的字符
const NAME_FORBIDDEN: &[char] = &['<', '>', '"', '\'', '%', ';', '(', ')', '&', '+'];

/// VIN 中禁止出现的字母
const VIN_FORBIDDEN: &[char] = &['I', 'O', 'Q'];

/// 合法车辆状态
pub const VEHICLE_STATUSES: &[&str] = &[
    "active",
    "maintenance",
    "out_of_service",
    "retired",
    "for_sale",
    "sold",
];

/// 规则求值上下文
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub today: NaiveDate,
}

/// 规则违规
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub error_type: ErrorType,
    pub message: String,
}

impl RuleViolation {
    fn new(error_type: ErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
        }
    }
}

// ==========================================
// Rule - 校验规则原语
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    Numeric,
    /// 非负
    Positive,
    MaxValue(i64),
    MaxLength(usize),
    MinLength(usize),
    Date,
    Time,
    Phone,
    Name,
    Grade,
    Vin,
    LicensePlate,
    VehicleStatus,
    Boolean,
    /// 年份范围，上限 = 当前年份 + years_ahead
    YearRange { min: i32, years_ahead: i32 },
    /// 由日期推算的年龄范围（周岁）
    AgeRange { min: i32, max: i32 },
    VehicleIdFormat,
}

impl Rule {
    /// 对单个取值求值；通过返回 None
    pub fn check(&self, value: &str, field: &str, ctx: &RuleContext) -> Option<RuleViolation> {
        let value = value.trim();
        if value.is_empty() {
            return match self {
                Rule::Required => Some(RuleViolation::new(
                    ErrorType::RequiredField,
                    format!("{} is required", field),
                )),
                _ => None,
            };
        }

        match self {
            Rule::Required => None,

            Rule::Numeric => match parse_integer(value) {
                Some(_) => None,
                None => Some(RuleViolation::new(
                    ErrorType::Format,
                    format!("{} must be a number", field),
                )),
            },

            Rule::Positive => match parse_integer(value) {
                Some(n) if n < 0 => Some(RuleViolation::new(
                    ErrorType::Validation,
                    format!("{} must be positive", field),
                )),
                _ => None,
            },

            Rule::MaxValue(max) => match parse_integer(value) {
                Some(n) if n > *max => Some(RuleViolation::new(
                    ErrorType::Validation,
                    format!("{} exceeds maximum allowed value", field),
                )),
                _ => None,
            },

            Rule::MaxLength(max) => {
                if value.chars().count() > *max {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} exceeds maximum length of {} characters", field, max),
                    ))
                } else {
                    None
                }
            }

            Rule::MinLength(min) => {
                if value.chars().count() < *min {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} must be at least {} characters", field, min),
                    ))
                } else {
                    None
                }
            }

            Rule::Date => match parse_date(value) {
                Some(_) => None,
                None => Some(RuleViolation::new(
                    ErrorType::Format,
                    format!("{} must be a valid date (MM/DD/YYYY or YYYY-MM-DD)", field),
                )),
            },

            Rule::Time => match parse_time(value) {
                Some(_) => None,
                None => Some(RuleViolation::new(
                    ErrorType::Format,
                    format!("{} must be a valid time (HH:MM or HH:MM AM/PM)", field),
                )),
            },

            Rule::Phone => {
                let digits = phone_digits(value).len();
                if digits == 10 || digits == 11 {
                    None
                } else {
                    Some(RuleViolation::new(
                        ErrorType::Format,
                        format!("{} must be a valid phone number", field),
                    ))
                }
            }

            Rule::Name => {
                if value
                    .chars()
                    .any(|c| c.is_ascii_digit() || NAME_FORBIDDEN.contains(&c))
                {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} contains invalid characters", field),
                    ))
                } else {
                    None
                }
            }

            Rule::Grade => {
                let grade = normalize_grade(value);
                let valid = grade == "PK"
                    || grade == "K"
                    || matches!(grade.parse::<u8>(), Ok(n) if (1..=12).contains(&n));
                if valid {
                    None
                } else {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} must be a valid grade level (PK, K, 1-12)", field),
                    ))
                }
            }

            Rule::Vin => {
                let vin = value.to_uppercase();
                if vin.chars().count() != 17 {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} must be 17 characters", field),
                    ))
                } else if vin
                    .chars()
                    .any(|c| !c.is_ascii_alphanumeric() || VIN_FORBIDDEN.contains(&c))
                {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} contains invalid VIN characters", field),
                    ))
                } else {
                    None
                }
            }

            Rule::LicensePlate => {
                if value.chars().count() > 20 {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} exceeds maximum length of 20 characters", field),
                    ))
                } else if value
                    .chars()
                    .any(|c| !(c.is_ascii_alphanumeric() || c == ' ' || c == '-'))
                {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} contains invalid characters", field),
                    ))
                } else {
                    None
                }
            }

            Rule::VehicleStatus => {
                let status = value.to_lowercase();
                if VEHICLE_STATUSES.contains(&status.as_str()) {
                    None
                } else {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} must be one of: {}", field, VEHICLE_STATUSES.join(", ")),
                    ))
                }
            }

            Rule::Boolean => match parse_boolean(value) {
                Some(_) => None,
                None => Some(RuleViolation::new(
                    ErrorType::Format,
                    format!(
                        "{} must be a boolean value (yes/no, true/false, 1/0)",
                        field
                    ),
                )),
            },

            Rule::YearRange { min, years_ahead } => {
                let max = ctx.today.year() + years_ahead;
                match parse_integer(value) {
                    Some(year) if year < i64::from(*min) || year > i64::from(max) => {
                        Some(RuleViolation::new(
                            ErrorType::Validation,
                            format!("{} must be between {} and {}", field, min, max),
                        ))
                    }
                    _ => None,
                }
            }

            Rule::AgeRange { min, max } => match parse_date(value) {
                Some(dob) => {
                    let age = age_on(dob, ctx.today);
                    if age < *min || age > *max {
                        Some(RuleViolation::new(
                            ErrorType::Validation,
                            format!("age must be between {} and {} years", min, max),
                        ))
                    } else {
                        None
                    }
                }
                None => None,
            },

            Rule::VehicleIdFormat => {
                if value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    None
                } else {
                    Some(RuleViolation::new(
                        ErrorType::Validation,
                        format!("{} contains invalid characters", field),
                    ))
                }
            }
        }
    }
}

/// 依次求值，遇到首个失败即停止（只针对当前字段）
pub fn apply_rules(
    rules: &[Rule],
    value: &str,
    field: &str,
    ctx: &RuleContext,
) -> Option<RuleViolation> {
    rules.iter().find_map(|rule| rule.check(value, field, ctx))
}
