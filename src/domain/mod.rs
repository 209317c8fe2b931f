// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含分类器的核心业务逻辑，包括：
/// - 领域模型（models）：域名任务、特征集合、词典、分类结果等
/// - 仓库接口（repositories）：结果输出的抽象接口
/// - 服务（services）：特征提取、文本评分、视觉评分与分数融合
pub mod models;
pub mod repositories;
pub mod services;
