//! # Operator Allow-List
//!
//! Decides which structural keys may appear in a client query.
//!
//! Keys without a `$` are ordinary field names and always pass. Keys with a
//! `$` pass only when they name an operator in [`SAFE_OPERATORS`] or a stage
//! in [`SAFE_STAGES`]. Anything else is rejected by absence: there is no
//! block-list, so operators added to the store later stay unusable until
//! reviewed and listed here. Cross-collection lookups, output redirection
//! and session or cache introspection stages are intentionally missing.
//!
//! Membership is part of the external contract. Adding an entry changes
//! what callers can express.

/// Character that marks a key as an operator or stage name
pub const OPERATOR_PREFIX: char = '$';

/// Expression and query operators callers may use
pub const SAFE_OPERATORS: &[&str] = &[
    "$abs", "$acos", "$acosh", "$add", "$addToSet", "$allElementsTrue", "$and",
    "$anyElementTrue", "$arrayElemAt", "$arrayToObject", "$asin", "$asinh", "$atan", "$atan2",
    "$atanh", "$avg", "$ceil", "$cmp", "$concat", "$concatArrays", "$cond", "$convert", "$cos",
    "$dateFromParts", "$dateToParts", "$dateFromString", "$dateToString", "$dayOfMonth",
    "$dayOfWeek", "$dayOfYear", "$degreesToRadians", "$divide", "$eq", "$exp", "$exists",
    "$filter", "$first", "$floor", "$gt", "$gte", "$hour", "$ifNull", "$in", "$indexOfArray",
    "$indexOfBytes", "$indexOfCP", "$isArray", "$isoDayOfWeek", "$isoWeek", "$isoWeekYear",
    "$last", "$let", "$literal", "$ln", "$log", "$log10", "$lt", "$lte", "$ltrim", "$map",
    "$max", "$mergeObjects", "$min", "$millisecond", "$minute", "$mod", "$month", "$multiply",
    "$ne", "$not", "$objectToArray", "$or", "$pow", "$push", "$radiansToDegrees", "$range",
    "$reduce", "$regexFind", "$regexFindAll", "$regexMatch", "$reverseArray", "$round",
    "$rtrim", "$second", "$setDifference", "$setEquals", "$setIntersection", "$setIsSubset",
    "$setUnion", "$size", "$sin", "$slice", "$split", "$sqrt", "$stdDevPop", "$stdDevSamp",
    "$strcasecmp", "$strLenBytes", "$strLenCP", "$substr", "$substrBytes", "$substrCP",
    "$subtract", "$sum", "$switch", "$tan", "$toBool", "$toDate", "$toDecimal", "$toDouble",
    "$toInt", "$toLong", "$toObjectId", "$toString", "$toLower", "$toUpper", "$trim", "$trunc",
    "$type", "$week", "$year", "$zip",
];

/// Pipeline stages callers may use
pub const SAFE_STAGES: &[&str] = &[
    "$addFields", "$bucket", "$bucketAuto", "$count", "$facet", "$geoNear", "$group", "$limit",
    "$match", "$project", "$redact", "$replaceRoot", "$replaceWith", "$sample", "$set", "$skip",
    "$sort", "$sortByCount", "$unset", "$unwind",
];

/// Whether `key` may appear as a structural key in a client query.
///
/// Comparison ignores ASCII case and surrounding whitespace, so `$MATCH`
/// and `" $match "` are treated like `$match`.
pub fn is_safe_key(key: &str) -> bool {
    if !key.contains(OPERATOR_PREFIX) {
        return true;
    }

    let candidate = key.trim();
    SAFE_OPERATORS
        .iter()
        .chain(SAFE_STAGES.iter())
        .any(|name| name.eq_ignore_ascii_case(candidate))
}
