// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::errors::ClassifierError;
use async_trait::async_trait;
use chromiumoxide::Page;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// 单个关闭动作点击的元素上限
const MAX_CLICKS_PER_PATTERN: usize = 3;

/// 遮罩层操作错误
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SurfaceError(pub String);

/// 遮罩层模式的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayAction {
    /// 点击第一个匹配的按钮
    Click,
    /// 点击所有匹配的按钮（最多3个）
    ClickAll,
    /// 按下 Escape
    PressEscape,
    /// 注入样式隐藏容器
    Hide,
}

/// 遮罩层模式
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayPattern {
    pub name: String,
    /// 容器选择器；存在时仅在容器出现后执行动作
    #[serde(default)]
    pub banner: Option<String>,
    /// 动作作用的目标选择器
    #[serde(default)]
    pub target: Option<String>,
    pub action: OverlayAction,
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    patterns: Vec<OverlayPattern>,
    #[serde(default = "default_hide_stubborn")]
    hide_stubborn_overlays: bool,
}

fn default_hide_stubborn() -> bool {
    true
}

/// 处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DismissalReport {
    /// 成功执行的模式名称
    pub applied: Vec<String>,
    /// 特征提取时需要排除的容器选择器
    pub excluded_selectors: Vec<String>,
    /// 失败记录，仅用于日志
    pub notes: Vec<String>,
    /// 兜底隐藏的遮罩层数量
    pub hidden_overlays: usize,
}

/// 可被处理的页面表面
#[async_trait]
pub trait OverlaySurface: Send + Sync {
    /// 是否为可交互的实时页面
    fn is_live(&self) -> bool;

    async fn is_present(&self, selector: &str) -> Result<bool, SurfaceError>;

    /// 点击最多 `limit` 个匹配元素，返回点击数量
    async fn click(&self, selector: &str, limit: usize) -> Result<usize, SurfaceError>;

    async fn press_escape(&self) -> Result<(), SurfaceError>;

    /// 隐藏匹配元素，返回隐藏数量
    async fn hide(&self, selector: &str) -> Result<usize, SurfaceError>;

    /// 隐藏覆盖大半视口的高层级固定元素
    async fn hide_stubborn_overlays(&self) -> Result<usize, SurfaceError>;
}

/// Cookie横幅、订阅弹窗与年龄确认的处理器
///
/// 尽力而为：任何错误只记录在报告中，永不失败
#[derive(Debug, Clone)]
pub struct OverlayDismisser {
    patterns: Vec<OverlayPattern>,
    hide_stubborn: bool,
}

impl OverlayDismisser {
    pub fn new(patterns: Vec<OverlayPattern>, hide_stubborn: bool) -> Self {
        Self {
            patterns,
            hide_stubborn,
        }
    }

    /// 从JSON文件加载模式列表
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ConfigInvalid(format!(
                "cannot read overlay patterns {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ClassifierError> {
        let file: PatternFile = serde_json::from_str(raw)
            .map_err(|e| ClassifierError::ConfigInvalid(format!("invalid overlay patterns: {}", e)))?;

        for pattern in &file.patterns {
            let needs_target = matches!(pattern.action, OverlayAction::Click | OverlayAction::ClickAll);
            if needs_target && pattern.target.is_none() {
                return Err(ClassifierError::ConfigInvalid(format!(
                    "overlay pattern '{}' needs a target selector",
                    pattern.name
                )));
            }
            if pattern.action == OverlayAction::Hide
                && pattern.target.is_none()
                && pattern.banner.is_none()
            {
                return Err(ClassifierError::ConfigInvalid(format!(
                    "overlay pattern '{}' has nothing to hide",
                    pattern.name
                )));
            }
        }

        Ok(Self::new(file.patterns, file.hide_stubborn_overlays))
    }

    pub fn patterns(&self) -> &[OverlayPattern] {
        &self.patterns
    }

    /// 按顺序应用所有模式
    pub async fn dismiss(&self, surface: &dyn OverlaySurface) -> DismissalReport {
        let mut report = DismissalReport::default();

        for pattern in &self.patterns {
            let banner_present = match &pattern.banner {
                Some(banner) => match surface.is_present(banner).await {
                    Ok(present) => present,
                    Err(e) => {
                        note(&mut report, &pattern.name, &e);
                        continue;
                    }
                },
                None => true,
            };
            if !banner_present {
                continue;
            }

            if !surface.is_live() {
                // 静态快照无法交互，只能把容器排除在提取之外
                let selector = match (&pattern.banner, pattern.action) {
                    (Some(banner), _) => Some(banner),
                    (None, OverlayAction::Hide) => pattern.target.as_ref(),
                    _ => None,
                };
                if let Some(selector) = selector {
                    if pattern.banner.is_some() || surface.is_present(selector).await.unwrap_or(false) {
                        report.excluded_selectors.push(selector.clone());
                        report.applied.push(pattern.name.clone());
                    }
                }
                continue;
            }

            match self.apply(surface, pattern).await {
                Ok(true) => report.applied.push(pattern.name.clone()),
                Ok(false) => {}
                Err(e) => note(&mut report, &pattern.name, &e),
            }
        }

        if surface.is_live() && self.hide_stubborn {
            match surface.hide_stubborn_overlays().await {
                Ok(hidden) => report.hidden_overlays = hidden,
                Err(e) => note(&mut report, "hide_stubborn_overlays", &e),
            }
        }

        report
    }

    async fn apply(
        &self,
        surface: &dyn OverlaySurface,
        pattern: &OverlayPattern,
    ) -> Result<bool, SurfaceError> {
        match pattern.action {
            OverlayAction::Click | OverlayAction::ClickAll => {
                let target = pattern
                    .target
                    .as_deref()
                    .ok_or_else(|| SurfaceError("missing target".to_string()))?;
                let limit = if pattern.action == OverlayAction::Click {
                    1
                } else {
                    MAX_CLICKS_PER_PATTERN
                };
                Ok(surface.click(target, limit).await? > 0)
            }
            OverlayAction::PressEscape => {
                surface.press_escape().await?;
                Ok(true)
            }
            OverlayAction::Hide => {
                let selector = pattern
                    .target
                    .as_deref()
                    .or(pattern.banner.as_deref())
                    .ok_or_else(|| SurfaceError("missing selector".to_string()))?;
                Ok(surface.hide(selector).await? > 0)
            }
        }
    }
}

fn note(report: &mut DismissalReport, name: &str, error: &SurfaceError) {
    debug!("Overlay pattern {} failed: {}", name, error);
    report.notes.push(format!("{}: {}", name, error));
}

/// 静态快照表面（回退服务返回的HTML）
///
/// 构造时一次性解析文档，记录哪些选择器存在
pub struct StaticSurface {
    present: HashSet<String>,
}

impl StaticSurface {
    pub fn from_html(html: &str, patterns: &[OverlayPattern]) -> Self {
        let document = Html::parse_document(html);
        let present = patterns
            .iter()
            .flat_map(|p| p.banner.iter().chain(p.target.iter()))
            .filter(|selector| {
                Selector::parse(selector)
                    .map(|s| document.select(&s).next().is_some())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Self { present }
    }
}

#[async_trait]
impl OverlaySurface for StaticSurface {
    fn is_live(&self) -> bool {
        false
    }

    async fn is_present(&self, selector: &str) -> Result<bool, SurfaceError> {
        Ok(self.present.contains(selector))
    }

    async fn click(&self, _selector: &str, _limit: usize) -> Result<usize, SurfaceError> {
        Ok(0)
    }

    async fn press_escape(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn hide(&self, _selector: &str) -> Result<usize, SurfaceError> {
        Ok(0)
    }

    async fn hide_stubborn_overlays(&self) -> Result<usize, SurfaceError> {
        Ok(0)
    }
}

const HIDE_STUBBORN_SCRIPT: &str = r#"(() => {
    const overlays = Array.from(document.querySelectorAll('*')).filter(el => {
        const style = window.getComputedStyle(el);
        const zIndex = parseInt(style.zIndex) || 0;
        const rect = el.getBoundingClientRect();
        return (style.position === 'fixed' || style.position === 'absolute') &&
            zIndex > 100 &&
            rect.width > window.innerWidth * 0.5 &&
            rect.height > window.innerHeight * 0.5;
    });
    overlays.forEach(el => { el.style.setProperty('display', 'none', 'important'); });
    document.documentElement.style.overflow = 'auto';
    document.body && (document.body.style.overflow = 'auto');
    return overlays.length;
})()"#;

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

async fn evaluate<T: serde::de::DeserializeOwned>(page: &Page, script: String) -> Result<T, SurfaceError> {
    page.evaluate(script)
        .await
        .map_err(|e| SurfaceError(e.to_string()))?
        .into_value::<T>()
        .map_err(|e| SurfaceError(e.to_string()))
}

/// 浏览器阶段的实时页面
#[async_trait]
impl OverlaySurface for Page {
    fn is_live(&self) -> bool {
        true
    }

    async fn is_present(&self, selector: &str) -> Result<bool, SurfaceError> {
        let script = format!(
            "(() => {{ try {{ return document.querySelector({}) !== null; }} catch (e) {{ return false; }} }})()",
            js_string(selector)
        );
        evaluate(self, script).await
    }

    async fn click(&self, selector: &str, limit: usize) -> Result<usize, SurfaceError> {
        let script = format!(
            "(() => {{ const els = Array.from(document.querySelectorAll({})).slice(0, {}); \
             els.forEach(el => el.click()); return els.length; }})()",
            js_string(selector),
            limit
        );
        evaluate(self, script).await
    }

    async fn press_escape(&self) -> Result<(), SurfaceError> {
        let script = "(() => { const opts = { key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true }; \
            document.dispatchEvent(new KeyboardEvent('keydown', opts)); \
            document.dispatchEvent(new KeyboardEvent('keyup', opts)); return true; })()"
            .to_string();
        evaluate::<bool>(self, script).await.map(|_| ())
    }

    async fn hide(&self, selector: &str) -> Result<usize, SurfaceError> {
        let script = format!(
            "(() => {{ const els = Array.from(document.querySelectorAll({})); \
             els.forEach(el => el.style.setProperty('display', 'none', 'important')); return els.length; }})()",
            js_string(selector)
        );
        evaluate(self, script).await
    }

    async fn hide_stubborn_overlays(&self) -> Result<usize, SurfaceError> {
        evaluate(self, HIDE_STUBBORN_SCRIPT.to_string()).await
    }
}
