// ==========================================
// 校车车队管理系统 - 数据清洗与取值解析
// ==========================================
// 职责: TRIM / 空白折叠 / 日期 / 时间 / 电话 / 布尔 / 整数 的解析与标准化
// 说明: 校验规则与类型转换共用这里的解析函数，保证“能通过校验 ⇔ 能转换”
// ==========================================

use chrono::{NaiveDate, NaiveTime};

/// 日期格式（按优先级）
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// 时间格式（按优先级）
const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p", "%I:%M:%S %p"];

/// TRIM + 折叠内部空白
pub fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 空白 → None
pub fn normalize_null(value: &str) -> Option<String> {
    let cleaned = clean_text(value);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// 解析日期
///
/// 支持: YYYY-MM-DD / MM/DD/YYYY / M/D/YYYY / MM-DD-YYYY / Jan D, YYYY / January D, YYYY
/// Excel 日期单元格已在读取阶段渲染为 YYYY-MM-DD
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let cleaned = clean_text(value);
    if cleaned.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// 解析时间
///
/// 支持: HH:MM (24h) / H:MM AM/PM / HH:MM:SS
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let cleaned = clean_text(value).to_uppercase();
    if cleaned.is_empty() {
        return None;
    }
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&cleaned, fmt).ok())
}

/// 提取数字字符
pub fn phone_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 电话号码标准化
///
/// - 10 位: (XXX) XXX-XXXX
/// - 11 位且以 1 开头: 1 (XXX) XXX-XXXX
/// - 其他: 原样返回（清洗后）
pub fn normalize_phone(value: &str) -> String {
    let digits = phone_digits(value);
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..10]),
        11 if digits.starts_with('1') => format!(
            "1 ({}) {}-{}",
            &digits[1..4],
            &digits[4..7],
            &digits[7..11]
        ),
        _ => clean_text(value),
    }
}

/// 解析布尔值
///
/// true/yes/y/1 → true；false/no/n/0 → false；其他 → None
pub fn parse_boolean(value: &str) -> Option<bool> {
    match clean_text(value).to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// 解析整数（允许千分位逗号和前导符号）
///
/// Excel 数值单元格中的整数已渲染为不带小数的字符串
pub fn parse_integer(value: &str) -> Option<i64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

/// 年级标准化（PREK → PK，其余转大写）
pub fn normalize_grade(value: &str) -> String {
    let upper = clean_text(value).to_uppercase();
    match upper.as_str() {
        "PREK" | "PRE-K" => "PK".to_string(),
        _ => upper,
    }
}

/// 根据出生日期计算周岁
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    use chrono::Datelike;
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  Main   St \t 12 "), "Main St 12");
        assert_eq!(normalize_null("   "), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(parse_date("2024-01-05"), Some(expected));
        assert_eq!(parse_date("01/05/2024"), Some(expected));
        assert_eq!(parse_date("1/5/2024"), Some(expected));
        assert_eq!(parse_date("01-05-2024"), Some(expected));
        assert_eq!(parse_date("Jan 5, 2024"), Some(expected));
        assert_eq!(parse_date("January 5, 2024"), Some(expected));
        assert_eq!(parse_date("2024/13/45"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_parse_time_formats() {
        let expected = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
        assert_eq!(parse_time("07:30"), Some(expected));
        assert_eq!(parse_time("7:30 AM"), Some(expected));
        assert_eq!(parse_time("7:30 am"), Some(expected));
        assert_eq!(parse_time("07:30:00"), Some(expected));
        assert_eq!(
            parse_time("3:15 PM"),
            Some(NaiveTime::from_hms_opt(15, 15, 0).unwrap())
        );
        assert_eq!(parse_time("25:99"), None);
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("503.555.0100"), "(503) 555-0100");
        assert_eq!(normalize_phone("1-503-555-0100"), "1 (503) 555-0100");
        assert_eq!(normalize_phone("555-0100"), "555-0100");
    }

    #[test]
    fn test_parse_boolean() {
        assert_eq!(parse_boolean("Yes"), Some(true));
        assert_eq!(parse_boolean("n"), Some(false));
        assert_eq!(parse_boolean("0"), Some(false));
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("12,345"), Some(12345));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("12.5"), None);
        assert_eq!(parse_integer("abc"), None);
    }

    #[test]
    fn test_age_on() {
        let dob = NaiveDate::from_ymd_opt(2020, 6, 15).unwrap();
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), 3);
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), 4);
    }
}
