use crate::dialects::Dialect;
use crate::model::HanaVersion;

/// Translate a structured function call whose arguments are already rendered.
///
/// Returns `None` for functions with no dedicated translation; callers emit
/// those verbatim.
pub fn translate_function(
    dialect: Dialect,
    version: HanaVersion,
    name: &str,
    args: &[String],
) -> Option<String> {
    let upper = name.to_uppercase();
    if let Some(sql) = translate_dialect_specific(dialect, version, &upper, args) {
        return Some(sql);
    }
    translate_common(dialect, &upper, args)
}

fn translate_dialect_specific(
    dialect: Dialect,
    version: HanaVersion,
    upper: &str,
    args: &[String],
) -> Option<String> {
    match (dialect, upper) {
        (Dialect::Snowflake, "IF") if args.len() >= 3 => {
            Some(format!("IFF({}, {}, {})", args[0], args[1], args[2]))
        }
        (Dialect::Hana, "IF") if args.len() >= 3 => {
            Some(format!("IF({}, {}, {})", args[0], args[1], args[2]))
        }
        (Dialect::Snowflake, "CONCAT" | "CONCATENATE") if args.len() >= 2 => Some(
            args.iter()
                .map(|a| format!("COALESCE({}, '')", a))
                .collect::<Vec<_>>()
                .join(" || "),
        ),
        (Dialect::Hana, "CONCAT" | "CONCATENATE") if args.len() >= 2 => {
            Some(format!("CONCAT({})", args.join(", ")))
        }
        (Dialect::Hana, "LEFTSTR") if version >= HanaVersion::V2 && args.len() >= 2 => {
            Some(format!("SUBSTRING({}, 1, {})", args[0], args[1]))
        }
        (Dialect::Hana, "RIGHTSTR") if version >= HanaVersion::V2 && args.len() >= 2 => {
            Some(format!("RIGHT({}, {})", args[0], args[1]))
        }
        (Dialect::Hana, "LEFTSTR" | "RIGHTSTR") if !args.is_empty() => {
            Some(format!("{}({})", upper, args.join(", ")))
        }
        (Dialect::Snowflake, "LEFTSTR") if args.len() >= 2 => {
            Some(format!("LEFT({}, {})", args[0], args[1]))
        }
        (Dialect::Snowflake, "RIGHTSTR") if args.len() >= 2 => {
            Some(format!("RIGHT({}, {})", args[0], args[1]))
        }
        (Dialect::Hana, "ADD_MONTHS") if args.len() >= 2 => {
            Some(format!("ADD_MONTHS({}, {})", args[0], args[1]))
        }
        (Dialect::Snowflake, "ADD_MONTHS") if args.len() >= 2 => {
            Some(format!("DATEADD(MONTH, {}, {})", args[1], args[0]))
        }
        _ => None,
    }
}

fn translate_common(dialect: Dialect, upper: &str, args: &[String]) -> Option<String> {
    let optional = |i: usize| {
        args.get(i)
            .map(|a| format!(", {}", a))
            .unwrap_or_default()
    };
    match upper {
        "CASE" | "CASE_WHEN" if args.len() >= 2 => {
            let mut parts = vec!["CASE".to_string()];
            let mut pairs = args.chunks_exact(2);
            for pair in pairs.by_ref() {
                parts.push(format!("WHEN {} THEN {}", pair[0], pair[1]));
            }
            if let [otherwise] = pairs.remainder() {
                parts.push(format!("ELSE {}", otherwise));
            }
            parts.push("END".to_string());
            Some(parts.join(" "))
        }
        "SUBSTRING" | "SUBSTR" if args.len() >= 2 => {
            Some(format!("SUBSTRING({}, {}{})", args[0], args[1], optional(2)))
        }
        "LENGTH" | "STRLEN" if !args.is_empty() => Some(format!("LENGTH({})", args[0])),
        "UPPER" | "UCASE" if !args.is_empty() => Some(format!("UPPER({})", args[0])),
        "LOWER" | "LCASE" if !args.is_empty() => Some(format!("LOWER({})", args[0])),
        "TRIM" if !args.is_empty() => Some(format!("TRIM({})", args[0])),
        "ROUND" | "CEIL" | "FLOOR" | "ABS" if !args.is_empty() => {
            Some(format!("{}({}{})", upper, args[0], optional(1)))
        }
        "COALESCE" | "NVL" | "IFNULL" if !args.is_empty() => {
            Some(format!("COALESCE({})", args.join(", ")))
        }
        "TO_DATE" if !args.is_empty() => {
            let format = args.get(1).map(String::as_str).unwrap_or("'YYYYMMDD'");
            Some(format!("TO_DATE({}, {})", args[0], format))
        }
        "TO_TIMESTAMP" if !args.is_empty() => {
            Some(format!("TO_TIMESTAMP({}{})", args[0], optional(1)))
        }
        "NOW" if args.is_empty() => Some(match dialect {
            Dialect::Hana => "CURRENT_TIMESTAMP".to_string(),
            Dialect::Snowflake => "CURRENT_TIMESTAMP()".to_string(),
        }),
        _ => None,
    }
}
