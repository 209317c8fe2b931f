// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 单域名分类用例、输入加载与调用预算
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、评分服务和输出接口
pub mod domain;

/// 引擎模块
///
/// 分阶段抓取：直接HTTP、无头浏览器与托管回退服务
pub mod engines;

/// 基础设施模块
///
/// 提供外部服务集成，如视觉模型、CSV输出与指标导出
pub mod infrastructure;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 有界并发的域名处理池
pub mod workers;
