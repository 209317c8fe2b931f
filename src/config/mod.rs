// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理分类器的配置设置，包括阈值、融合权重、阶段超时、预算等配置
pub mod settings;
