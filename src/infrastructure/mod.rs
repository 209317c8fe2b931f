// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 该模块包含系统的技术实现细节，负责与外部系统的交互。
///
/// 包含的子模块：
/// - 指标（metrics）：Prometheus 导出与指标说明
/// - 仓库实现（repositories）：可断点续跑的CSV结果输出
/// - 视觉（vision）：OpenAI 兼容的视觉分类客户端
///
/// 基础设施层依赖于领域层的抽象接口，
/// 确保领域层保持纯粹的业务逻辑，不受技术实现的影响。
pub mod metrics;
pub mod repositories;
pub mod vision;
