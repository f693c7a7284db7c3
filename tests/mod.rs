mod support;

mod consumer_tests;
