use agentflow_core::LateBinding;
use regex::{Captures, Regex};

const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_.:/-]*)\s*\}\}";

/// `{{ name }}` 占位符模板引擎
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    placeholder: Regex,
}

impl TemplateEngine {
    /// 创建模板引擎
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    /// 提取引用的变量名，按首次出现顺序去重
    pub fn placeholders(&self, template: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in self.placeholder.captures_iter(template) {
            let name = &caps[1];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// 渲染模板；`lookup` 返回 `None` 的占位符原样保留
    pub fn render<F>(&self, template: &str, mut lookup: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        self.placeholder
            .replace_all(template, |caps: &Captures| {
                lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// 渲染模板，同时返回保留下来的占位符在输出中的字节区间
    pub fn render_with_slots<F>(&self, template: &str, mut lookup: F) -> (String, Vec<LateBinding>)
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(template.len());
        let mut slots = Vec::new();
        let mut last = 0;
        for caps in self.placeholder.captures_iter(template) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            out.push_str(&template[last..whole.start()]);
            match lookup(&caps[1]) {
                Some(value) => out.push_str(&value),
                None => {
                    let start = out.len();
                    out.push_str(whole.as_str());
                    slots.push(LateBinding {
                        part: 0,
                        start,
                        end: out.len(),
                        name: caps[1].to_string(),
                    });
                }
            }
            last = whole.end();
        }
        out.push_str(&template[last..]);
        (out, slots)
    }

    /// 使用名称/值对渲染
    pub fn render_pairs<'a, I>(&self, template: &str, pairs: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        self.render(template, |name| {
            pairs
                .clone()
                .into_iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        })
    }
}
