//! Recover files from agent output that pasted code instead of calling the
//! file writer tool.
//!
//! Only fenced blocks tagged with a known language are considered. Each gets a
//! filename inferred from, in order:
//!
//! 1. a filename comment in its first five lines (`# calculator.py`),
//! 2. the most recent markdown heading naming a file before the block,
//! 3. a "file/save/create X" phrase shortly before the block,
//! 4. for Python, the first class name in snake case, or `main.py` for a
//!    `def main`,
//! 5. `code_<n>.<ext>`, where `n` counts every fenced block from 1.

use regex::Regex;
use std::sync::LazyLock;

/// How far back (in bytes) a "save as" phrase may appear before its block.
const SAVE_HINT_WINDOW: usize = 200;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(\w+)?\n(.*?)```").expect("code fence regex must compile")
});
static FILENAME_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#\s*(?:filename:\s*)?(\w[\w\-]*\.\w+)")
        .expect("filename comment regex must compile")
});
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#+\s+(?:\d+\.?\d*\s+)?(\w[\w\-]*\.\w+)").expect("heading regex must compile")
});
static SAVE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:file|save|create|ファイル)[\s:]*[`"]?(\w[\w\-]*\.\w+)"#)
        .expect("save hint regex must compile")
});
static CLASS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"class\s+(\w+)").expect("class name regex must compile"));
static DEF_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"def\s+(\w+)").expect("def name regex must compile"));

/// A fenced code block worth saving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub filename: String,
    pub content: String,
}

/// File extension for a fence language tag, `None` for unknown tags.
pub fn extension_for(language: &str) -> Option<&'static str> {
    let extension = match language {
        "python" | "py" => "py",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" => "yaml",
        "yml" => "yml",
        "markdown" | "md" => "md",
        "txt" => "txt",
        "sh" | "bash" => "sh",
        "sql" => "sql",
        _ => return None,
    };
    Some(extension)
}

/// Extract saveable code blocks from `text`.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();

    for (index, captures) in FENCE.captures_iter(text).enumerate() {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let language = captures
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let content = captures.get(2).map_or("", |m| m.as_str()).trim();

        if content.is_empty() {
            continue;
        }
        let Some(extension) = extension_for(&language) else {
            continue;
        };

        let before = &text[..whole.start()];
        let filename = filename_comment(content)
            .or_else(|| last_heading_filename(before))
            .or_else(|| save_hint(before))
            .or_else(|| python_name(content, extension))
            .unwrap_or_else(|| format!("code_{}.{}", index + 1, extension));

        blocks.push(CodeBlock {
            language,
            filename: clean_filename(&filename),
            content: content.to_string(),
        });
    }

    blocks
}

fn filename_comment(content: &str) -> Option<String> {
    content
        .lines()
        .take(5)
        .find_map(|line| FILENAME_COMMENT.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn last_heading_filename(before: &str) -> Option<String> {
    HEADING
        .captures_iter(before)
        .filter_map(|c| c.get(1))
        .last()
        .map(|m| m.as_str().to_string())
}

fn save_hint(before: &str) -> Option<String> {
    let mut start = before.len().saturating_sub(SAVE_HINT_WINDOW);
    while !before.is_char_boundary(start) {
        start += 1;
    }
    SAVE_HINT
        .captures(&before[start..])
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn python_name(content: &str, extension: &str) -> Option<String> {
    if extension != "py" {
        return None;
    }
    if let Some(class) = CLASS_NAME.captures(content).and_then(|c| c.get(1)) {
        return Some(format!("{}.py", snake_case(class.as_str())));
    }
    DEF_NAME
        .captures(content)
        .and_then(|c| c.get(1))
        .filter(|name| name.as_str() == "main")
        .map(|_| "main.py".to_string())
}

/// `CamelCase` to `camel_case`: an underscore before every uppercase letter
/// except the first character.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if i > 0 && c.is_uppercase() {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Drop `./`, `/` and `workspace/` prefixes agents like to add.
fn clean_filename(filename: &str) -> String {
    let unified = filename.replace('\\', "/");
    let lower = unified.to_ascii_lowercase();
    for prefix in ["/workspace/", "workspace/", "./", "/"] {
        if lower.starts_with(prefix) {
            return unified[prefix.len()..].to_string();
        }
    }
    unified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_comment() {
        let text = "Here you go:\n```python\n# calculator.py\ndef add(a, b):\n    return a + b\n```\n";
        let blocks = extract_code_blocks(text);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].filename, "calculator.py");
        assert_eq!(blocks[0].language, "python");
        assert!(blocks[0].content.starts_with("# calculator.py"));
    }

    #[test]
    fn test_filename_from_latest_heading() {
        let text = "### 1. setup.py\n\n### 3.1 app.js\n```js\nconsole.log(1)\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].filename, "app.js");
    }

    #[test]
    fn test_filename_from_save_hint() {
        let text = "Create file: `styles.css`\n```css\nbody { margin: 0; }\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].filename, "styles.css");
    }

    #[test]
    fn test_python_class_name_in_snake_case() {
        let text = "```python\nclass TodoListManager:\n    pass\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].filename, "todo_list_manager.py");
    }

    #[test]
    fn test_python_main_function() {
        let text = "```py\ndef main():\n    print('hi')\n```";
        assert_eq!(extract_code_blocks(text)[0].filename, "main.py");
    }

    #[test]
    fn test_fallback_numbers_every_fence() {
        let text = "```text\nignored\n```\n\n```sql\nSELECT 1;\n```";
        let blocks = extract_code_blocks(text);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].filename, "code_2.sql");
    }

    #[test]
    fn test_untagged_and_unknown_languages_ignored() {
        let text = "```\nplain\n```\n```plaintext\nx\n```\n```rust\nfn main() {}\n```";
        assert!(extract_code_blocks(text).is_empty());
    }

    #[test]
    fn test_empty_block_ignored() {
        assert!(extract_code_blocks("```python\n   \n```").is_empty());
    }

    #[test]
    fn test_workspace_prefix_removed() {
        assert_eq!(clean_filename("workspace/app.py"), "app.py");
        assert_eq!(clean_filename("/Workspace/app.py"), "app.py");
        assert_eq!(clean_filename("./app.py"), "app.py");
        assert_eq!(clean_filename("app.py"), "app.py");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("HTTPServer"), "h_t_t_p_server");
        assert_eq!(snake_case("Calculator"), "calculator");
    }

    #[test]
    fn test_save_hint_window_respects_char_boundaries() {
        let padding = "あ".repeat(100);
        let text = format!("{padding}\n```json\n{{}}\n```");
        let blocks = extract_code_blocks(&text);
        assert_eq!(blocks[0].filename, "code_1.json");
    }
}
