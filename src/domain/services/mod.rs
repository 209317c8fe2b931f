// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 该模块包含分类器的核心业务逻辑，这些服务不依赖具体的抓取方式：
///
/// - 特征提取（feature_extractor）：从HTML/Markdown中提取导航、标题、主视觉文本与候选图片
/// - 文本评分（text_scorer）：基于多语言词典的阶段A评分
/// - 视觉评分（vision_scorer）：在文本信号不确定或提取稀疏时调用视觉模型的阶段B评分
/// - 分数融合（fusion）：融合两阶段分数并按阈值判定标签
pub mod feature_extractor;
pub mod fusion;
pub mod text_scorer;
pub mod vision_scorer;
