use crate::models::job::EmploymentType;

/// Keywords checked in order against the padded, lower-cased text; the
/// surrounding spaces make most entries whole-word matches.
const KEYWORDS: &[(&str, EmploymentType)] = &[
    (" full time ", EmploymentType::FullTime),
    (" fulltime ", EmploymentType::FullTime),
    (" permanent ", EmploymentType::FullTime),
    (" part time ", EmploymentType::PartTime),
    (" parttime ", EmploymentType::PartTime),
    (" contract", EmploymentType::Contract),
    (" freelance ", EmploymentType::Contract),
    (" 1099 ", EmploymentType::Contract),
    (" temporary ", EmploymentType::Temp),
    (" temp ", EmploymentType::Temp),
    (" seasonal ", EmploymentType::Temp),
    (" internship ", EmploymentType::Intern),
    (" intern ", EmploymentType::Intern),
];

/// Map free text like `"Full-Time"` or `"contract_time: part_time"` onto the
/// closed set. Unrecognized text is `None`, never an error.
pub fn classify(text: &str) -> Option<EmploymentType> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let padded = format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "));
    KEYWORDS
        .iter()
        .find(|(keyword, _)| padded.contains(keyword))
        .map(|(_, kind)| *kind)
}
