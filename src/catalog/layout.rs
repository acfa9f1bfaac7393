const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FOLDER_NAME_LEN: usize = 100;

/// 把任意字符串处理成可用的目录名
///
/// Windows 路径中的非法字符替换为 `-`，去掉首尾的空格和点，最长 100 个字符。
pub fn sanitize_folder_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '-' } else { c })
        .collect();

    replaced
        .trim_matches(|c| c == ' ' || c == '.')
        .chars()
        .take(MAX_FOLDER_NAME_LEN)
        .collect()
}
