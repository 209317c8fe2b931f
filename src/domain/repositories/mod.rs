// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 该模块定义了领域层的持久化抽象，具体实现由基础设施层提供。
///
/// 包含的接口：
/// - 结果输出（result_sink）：仅追加、可断点续跑的分类结果输出
pub mod result_sink;
