// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作池模块
///
/// 以有界并发处理域名列表，支持取消与断点续跑
pub mod manager;
