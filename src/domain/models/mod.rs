// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了分类器的核心实体，包括：
/// - 域名任务（domain_task）：流水线的输入单元
/// - 抓取（fetch）：阶段、尝试记录与抓取到的页面
/// - 特征集合（feature_bundle）：从页面中提取的导航、标题、主视觉文本与候选图片
/// - 词典（dictionary）：多语言带权重词条
/// - 评分（score）与分类结果（classification）
pub mod classification;
pub mod dictionary;
pub mod domain_task;
pub mod feature_bundle;
pub mod fetch;
pub mod score;
